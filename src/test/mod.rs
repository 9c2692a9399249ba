mod batch;
mod registry;
