// Pipeline storage: the columnar dataset, its builder and the delimited exporter

pub mod builder;
pub mod dataset;
pub mod exporter;
