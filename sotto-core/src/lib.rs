#![allow(clippy::new_without_default)]

pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod oauth;
pub mod promise;
pub mod route;
pub mod session;
pub mod util;
pub mod webapi;
