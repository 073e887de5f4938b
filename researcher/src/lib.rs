// Library interface for the research service modules
// This allows tests and the binary to import modules

pub mod extractor;
pub mod fetcher;
pub mod history;
pub mod llm;
pub mod research;
pub mod search;
pub mod server;
