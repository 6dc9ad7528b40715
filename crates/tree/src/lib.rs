//! Challenge tree data model.
//!
//! The [`Tree`] exclusively owns every [`ChallengeNode`] through an ID→node
//! map; parent/child links are stored as IDs only and all traversals go
//! through the owning map. Mutations are all-or-nothing: a rejected change
//! leaves the tree untouched.

mod node;
mod scoring;
mod tree;
mod viz;

pub use node::ChallengeNode;
pub use node::NodeId;
pub use node::RunRecord;
pub use scoring::difficulty_multiplier;
pub use scoring::performance_score;
pub use tree::Statistics;
pub use tree::Tree;
pub use tree::TreeExport;
