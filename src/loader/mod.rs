// Object library import (YAML)

pub mod library;
