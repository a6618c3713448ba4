pub mod approve;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod init;
pub mod reconcile;
pub mod refine;
pub mod review;
pub mod run;
pub mod status;
