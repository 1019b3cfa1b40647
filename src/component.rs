//! Defines the Component trait for sinks at the end of a timebeam pipeline.
//! A component runs on its own thread and consumes what the pipeline
//! produces from a channel, so that slow output (e.g. writing files) does
//! not hold up the beamforming.

use crate::error::BeamError;

use log::{info, warn};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

/// What can go wrong inside a component.
#[derive(Debug)]
pub enum ComponentError {
    /// Writing a WAV file failed.
    HoundError(hound::Error),
    /// The data handed to the component does not fit its configuration.
    BeamError(BeamError),
    /// The component thread panicked before it could report back.
    Panicked,
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComponentError::HoundError(error) => write!(f, "wav error: {}", error),
            ComponentError::BeamError(error) => write!(f, "{}", error),
            ComponentError::Panicked => write!(f, "component thread panicked"),
        }
    }
}

impl std::error::Error for ComponentError {}

impl From<hound::Error> for ComponentError {
    fn from(error: hound::Error) -> Self {
        ComponentError::HoundError(error)
    }
}

impl From<BeamError> for ComponentError {
    fn from(error: BeamError) -> Self {
        ComponentError::BeamError(error)
    }
}

///
/// A consumer at the end of a pipeline. Components display as their name,
/// which is used in log messages.
///
pub trait Component: fmt::Display {
    /// What the component receives from its input channel
    type InData;
    /// What the component sends on its output channel
    type OutData;

    /// Converts an input of type InData into an output of type OutData
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up at termination of pipeline
    fn finalize(&mut self) -> Result<(), ComponentError>;
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel. When the input channel is
/// closed, the Component is finalized and the thread returns the result of
/// finalizing.
pub fn run_component<C: Component + Send + 'static>(
    mut component: Box<C>,
    input: Receiver<<C as Component>::InData>,
    output: Sender<<C as Component>::OutData>,
) -> JoinHandle<Result<(), ComponentError>>
where
    <C as Component>::InData: Send + 'static,
    <C as Component>::OutData: Send + 'static,
{
    thread::spawn(move || {
        let mut converted = 0usize;
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            converted += 1;
            if let Err(error) = output.send(out_data) {
                warn!("{} : received error {}.", component, error);
            }
        }

        let finalized = component.finalize();
        if let Err(component_error) = &finalized {
            warn!("{} : error during terminating : {}.", component, component_error);
        }
        info!("{} : terminated after {} inputs.", component, converted);
        finalized
    })
}
