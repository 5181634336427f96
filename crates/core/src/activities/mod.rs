pub mod embed;
pub mod fetch;
pub mod parse;
pub mod store;

pub use embed::EmbedActivity;
pub use fetch::FetchActivity;
pub use parse::ParseActivity;
pub use store::{record_id, StoreActivity};
