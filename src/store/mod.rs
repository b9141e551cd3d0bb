// Persistence layer backing the three indexing strategies.
//
// Every store supports upsert-by-id, delete-by-id and consistent snapshot
// reads: the vector store commits whole batches in one SQLite transaction,
// the keyword and graph stores are mutated on a working copy that is
// written atomically and then swapped in.

pub mod graph;
pub mod keyword;
pub mod vector;

pub use graph::GraphStore;
pub use keyword::KeywordStore;
pub use vector::VectorStore;
