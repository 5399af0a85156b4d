pub mod cancel;
pub mod progress;
pub mod import;
pub mod extraction;
pub mod record;
pub mod analysis;
pub mod strategy;
pub mod sampler;
pub mod merge;
pub mod completeness;
pub mod references;
pub mod output;
pub mod validation;
pub mod quality;
pub mod processor;

#[cfg(test)]
pub(crate) mod test_support;
