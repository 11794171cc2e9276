pub mod judges;
pub mod migration;
pub mod recalc;
pub mod scoring;
pub mod stats;
