// Integration tests over the HTTP surface, see Cargo.toml [[test]].

#[path = "../common/mod.rs"]
mod common;

mod auth;
mod compliance;
mod evidence;
mod exports;
mod iam_admin;
mod risk;
mod scoping;
