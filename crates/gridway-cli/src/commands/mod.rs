pub mod clean;
pub mod install;
pub mod kill;
pub mod run;
pub mod sweep;
