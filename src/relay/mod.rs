pub mod adaptor;
pub mod billing;
pub mod meta;
pub mod mode;
pub mod pipeline;
pub mod request;
pub mod tokenizer;
pub mod transport;
