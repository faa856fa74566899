use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::path::Path;

pub fn partmark_cmd() -> Command {
    cargo_bin_cmd!("partmark")
}

pub fn hash_partition(dir: &Path) {
    partmark_cmd().arg("hash").arg(dir).assert().success();
}
