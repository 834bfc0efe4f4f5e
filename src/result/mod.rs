mod query_result;

pub use query_result::QueryResult;
