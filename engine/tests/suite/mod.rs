mod engine;
mod properties;
