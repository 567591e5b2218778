// autodm: keyword-triggered DMs for Instagram comments
//
// This is the library root. Each module corresponds to a stage of the
// comment-to-DM pipeline or the infrastructure around it.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod pipeline;
pub mod status;
pub mod web;
pub mod webhook;
