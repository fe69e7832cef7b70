//! mkfs: build an empty filesystem image file.
//!
//!   mkfs <image> [blocks]

use std::env;

use rufs::block_dev::FileDisk;
use rufs::mkfs::{mkfs, Config};

fn main() {
    let path = env::args().nth(1).expect("usage: mkfs <image> [blocks]");
    let config = match env::args().nth(2) {
        Some(blocks) => Config {
            size: blocks.parse().expect("mkfs: blocks is not a number"),
            ..Config::default()
        },
        None => Config::default(),
    };

    let disk = FileDisk::create(&path, config.size).expect("mkfs: cannot create image");
    let sb = mkfs(&disk, config).expect("mkfs: format failed");
    println!(
        "mkfs: {}: {} blocks ({} data, {} inodes, {} log)",
        path, sb.size, sb.nblocks, sb.ninodes, sb.nlog
    );
}
