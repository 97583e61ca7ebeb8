//! Error types for the engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("too many plugin instances specified (max is {max})")]
    TooManyInstances { max: usize },

    #[error(transparent)]
    Plugin(#[from] continuo_plugin::Error),

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("audio device not available")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("failed to open MIDI input: {0}")]
    MidiInit(#[from] midir::InitError),

    #[error("failed to connect MIDI input: {0}")]
    MidiConnect(String),

    #[error("MIDI port \"{0}\" not found")]
    MidiPortNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
