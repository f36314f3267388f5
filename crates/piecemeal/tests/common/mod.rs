#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use piecemeal::{bencode::Value, metainfo::Sha1Hash};
use rand::{distributions::Alphanumeric, Rng, RngCore};

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .compact()
        .with_file(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

/// A random directory under the temp dir, deleted on drop.
pub struct Fixture {
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let name: String = rand::thread_rng()
            .sample_iter(Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();
        let root = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write(&self, relative: impl AsRef<Path>, bytes: &[u8]) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn dict(entries: Vec<(&str, Value)>) -> Value {
    Value::Dict(
        entries
            .into_iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn pieces(payload: &[u8], piece_length: usize) -> Value {
    Value::Bytes(
        payload
            .chunks(piece_length)
            .flat_map(|chunk| Sha1Hash::digest(chunk).0)
            .collect(),
    )
}

fn torrent(info: Value) -> Vec<u8> {
    dict(vec![
        ("announce", Value::from("udp://tracker.example.org:6969")),
        ("created by", Value::from("tests")),
        ("info", info),
    ])
    .to_bytes()
    .unwrap()
}

/// A single file torrent of `data`.
pub fn single_file(name: &str, data: &[u8], piece_length: usize) -> Vec<u8> {
    torrent(dict(vec![
        ("length", Value::Integer(data.len() as i64)),
        ("name", Value::from(name)),
        ("piece length", Value::Integer(piece_length as i64)),
        ("pieces", pieces(data, piece_length)),
    ]))
}

/// A multi file torrent, `files` are `(path, data)` in payload order.
pub fn multi_file(
    name: &str,
    files: &[(&str, &[u8])],
    piece_length: usize,
) -> Vec<u8> {
    let payload: Vec<u8> =
        files.iter().flat_map(|(_, data)| data.iter().copied()).collect();

    let list = files
        .iter()
        .map(|(path, data)| {
            dict(vec![
                ("length", Value::Integer(data.len() as i64)),
                (
                    "path",
                    Value::List(path.split('/').map(Value::from).collect()),
                ),
            ])
        })
        .collect::<Vec<_>>();

    torrent(dict(vec![
        ("files", Value::List(list)),
        ("name", Value::from(name)),
        ("piece length", Value::Integer(piece_length as i64)),
        ("pieces", pieces(&payload, piece_length)),
    ]))
}
