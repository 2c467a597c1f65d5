pub(crate) mod bridge;
pub(crate) mod engine;
pub(crate) mod foreign;
pub(crate) mod handles;
pub(crate) mod link;
pub(crate) mod marshal;
