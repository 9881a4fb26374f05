pub mod config;
pub mod db;
pub mod drive;
pub mod jobs;
pub mod model;
pub mod reconcile;
pub mod split;
