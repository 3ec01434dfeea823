// Unit test target, see Cargo.toml [[test]].

mod engine;
mod reports;
