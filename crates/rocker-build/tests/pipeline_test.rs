//! Build pipeline integration tests.
//!
//! Parse a Containerfile, pull from a mocked registry, assemble the root
//! filesystem, and apply `COPY`/`ENTRYPOINT` on top of it.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use httpmock::prelude::*;
use rocker_build::parser::parse_instructions;
use rocker_build::runner::BuildRunner;
use rocker_common::config::RegistryConfig;
use rocker_common::types::Platform;
use rocker_image::registry::RegistryClient;
use rocker_image::storage::LayerStore;
use serde_json::json;
use sha2::{Digest, Sha256};

const CONTAINERFILE: &str = r#"
FROM node:alpine
COPY index.js /app/index.js
ENTRYPOINT ["/usr/local/bin/node", "/app/index.js"]
"#;

enum Entry<'a> {
    File(&'a str, &'a [u8], u32),
    Symlink(&'a str, &'a str),
}

fn layer_blob(entries: &[Entry<'_>]) -> (Vec<u8>, String) {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            Entry::File(name, data, mode) => {
                header.set_size(data.len() as u64);
                header.set_mode(*mode);
                header.set_cksum();
                builder.append_data(&mut header, name, *data).expect("file");
            }
            Entry::Symlink(name, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_link_name(target).expect("link name");
                header.set_cksum();
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .expect("symlink");
            }
        }
    }
    let bytes = builder
        .into_inner()
        .expect("tar")
        .finish()
        .expect("gzip");
    let digest = format!("sha256:{:x}", Sha256::digest(&bytes));
    (bytes, digest)
}

/// Mounts token, manifest list, manifest, and blob endpoints for `library/node:alpine`.
fn mock_registry(server: &MockServer) -> Vec<httpmock::Mock<'_>> {
    let (base, base_digest) = layer_blob(&[
        Entry::File("usr/local/bin/node", b"#!/bin/sh\necho node\n", 0o755),
        Entry::File("etc/motd", b"base\n", 0o644),
        Entry::Symlink("bin/sh", "/bin/busybox"),
    ]);
    let (top, top_digest) = layer_blob(&[Entry::File("etc/motd", b"welcome\n", 0o644)]);

    vec![
        server.mock(|when, then| {
            when.method(GET)
                .path("/token")
                .query_param("scope", "repository:library/node:pull");
            then.status(200).json_body(json!({ "token": "t0k" }));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/v2/library/node/manifests/alpine");
            then.status(200).json_body(json!({
                "manifests": [
                    { "digest": "sha256:list-amd64", "platform": { "os": "linux", "architecture": "amd64" } }
                ]
            }));
        }),
        server.mock(|when, then| {
            when.method(GET)
                .path("/v2/library/node/manifests/sha256:list-amd64");
            then.status(200).json_body(json!({
                "layers": [ { "digest": base_digest }, { "digest": top_digest } ]
            }));
        }),
        server.mock(|when, then| {
            when.method(GET)
                .path(format!("/v2/library/node/blobs/{base_digest}"));
            then.status(200).body(base.clone());
        }),
        server.mock(|when, then| {
            when.method(GET)
                .path(format!("/v2/library/node/blobs/{top_digest}"));
            then.status(200).body(top.clone());
        }),
    ]
}

fn runner(server: &MockServer, cache: &Path, context: &Path) -> BuildRunner<RegistryClient> {
    let client = RegistryClient::new(RegistryConfig {
        auth_url: server.url("/token"),
        auth_service: "registry.test".into(),
        registry_url: server.base_url(),
    })
    .expect("client")
    .with_platform(Platform::new("linux", "amd64"));
    BuildRunner::new(LayerStore::open(cache).expect("store"), client, context)
}

#[test]
fn containerfile_builds_rootfs_from_registry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let context = tmp.path().join("context");
    std::fs::create_dir_all(&context).expect("mkdir");
    std::fs::write(context.join("index.js"), b"console.log('hello')\n").expect("write");
    let cache = tmp.path().join("cache");

    let server = MockServer::start();
    let mocks = mock_registry(&server);
    let instructions = parse_instructions(CONTAINERFILE).expect("parse");
    let prepared = runner(&server, &cache, &context)
        .prepare(&instructions)
        .expect("prepare");

    for mock in &mocks {
        mock.assert();
    }
    assert_eq!(prepared.rootfs, cache.join("rootfs/node/alpine"));
    assert_eq!(
        prepared.entrypoint,
        vec!["/usr/local/bin/node", "/app/index.js"]
    );

    let rootfs = &prepared.rootfs;
    assert_eq!(
        std::fs::read_to_string(rootfs.join("etc/motd")).expect("motd"),
        "welcome\n"
    );
    assert_eq!(
        std::fs::read_link(rootfs.join("bin/sh")).expect("readlink"),
        Path::new("/bin/busybox")
    );
    assert!(rootfs.join("usr/local/bin/node").is_file());
    assert_eq!(
        std::fs::read(rootfs.join("app/index.js")).expect("copied"),
        b"console.log('hello')\n"
    );
    let layers = std::fs::read_dir(cache.join("layers/node/alpine"))
        .expect("layers")
        .count();
    assert_eq!(layers, 2);
}

#[test]
fn second_build_reuses_rootfs_without_network() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let context = tmp.path().join("context");
    std::fs::create_dir_all(&context).expect("mkdir");
    std::fs::write(context.join("index.js"), b"v1").expect("write");
    let cache = tmp.path().join("cache");
    let instructions = parse_instructions(CONTAINERFILE).expect("parse");

    let first = MockServer::start();
    let _mocks = mock_registry(&first);
    let _ = runner(&first, &cache, &context)
        .prepare(&instructions)
        .expect("first build");

    // A new inode, so the hard link from the first build still sees v1.
    std::fs::remove_file(context.join("index.js")).expect("rm");
    std::fs::write(context.join("index.js"), b"v2").expect("rewrite");
    let copied = cache.join("rootfs/node/alpine/app/index.js");
    assert_eq!(std::fs::read(&copied).expect("read"), b"v1");

    let second = MockServer::start();
    let token = second.mock(|when, then| {
        when.path("/token");
        then.status(500);
    });
    let prepared = runner(&second, &cache, &context)
        .prepare(&instructions)
        .expect("cached build");

    token.assert_hits(0);
    assert_eq!(
        std::fs::read(prepared.rootfs.join("app/index.js")).expect("read"),
        b"v2"
    );
}

#[test]
fn registry_failure_names_its_stage() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start();
    let _denied = server.mock(|when, then| {
        when.method(GET).path("/token");
        then.status(401);
    });
    let instructions = parse_instructions("FROM alpine:3.19\nENTRYPOINT /bin/sh").expect("parse");

    let err = runner(&server, &tmp.path().join("cache"), tmp.path())
        .prepare(&instructions)
        .expect_err("unauthorized");
    assert_eq!(
        err.stage(),
        Some(rocker_common::error::PipelineStage::Auth)
    );
}
