pub mod cohere;
pub mod milvus;
pub mod pdf;

pub use cohere::CohereClient;
pub use milvus::MilvusStore;
pub use pdf::LopdfParser;
