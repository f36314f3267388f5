use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::metainfo::MetafileError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Metafile(#[from] MetafileError),

    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("Join error: {0}")]
    JoinError(#[from] JoinError),

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format: {0}"
    )]
    ConfigDeserializeError(String),

    #[error("Could not write the default configuration: {0}")]
    ConfigSerializeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
