pub mod git;
pub mod query;
pub mod repos;
pub mod resources;
pub mod sessions;
pub mod workspaces;
