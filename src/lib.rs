//! Function-preserving network morphism operators over Candle tensors.
//!
//! `netmorph` grows trained networks without disturbing the function they
//! compute. [`wider::widen`] duplicates randomly drawn output units of a
//! producer layer and rescales the consuming layer's matching input slices so
//! the composed output is unchanged; [`deeper::deepen`] splices an
//! identity-initialised layer after an existing one. Both return fresh layer
//! state the caller commits through a [`host::LayerHost`], and both draw all
//! randomness from an explicitly passed RNG so seeded runs reproduce exactly.
//!
//! [`verify::Verifier`] replays a teacher/student pair through an explicit
//! brute-force convolution (or the dense equivalent) and confirms the morphed
//! network still matches the original within tolerance. Run it with noise
//! disabled after surgery whenever strict reproducibility matters.
//!
//! ```no_run
//! use netmorph::{widen, Layer, WidenOptions};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! fn grow(producer: &Layer, consumer: &Layer) -> netmorph::Result<()> {
//!     let mut rng = StdRng::seed_from_u64(0);
//!     let widened = widen(producer, consumer, 12, None, &WidenOptions::default(), &mut rng)?;
//!     assert_eq!(widened.producer.output_units(), 12);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod deeper;
pub mod host;
pub mod layers;
pub mod noise;
pub mod verify;
pub mod wider;

pub use crate::core::{
    DeepenOptions, LayerKind, MorphError, Result, WeightLayout, WidenOptions, ERROR_TOLERANCE,
    NOISE_RATIO,
};
pub use crate::deeper::{deepen, LayerStack, StackEntry};
pub use crate::host::{LayerHost, SequentialHost};
pub use crate::layers::{
    Activation, BatchNorm, Conv2d, Conv2dConfig, Conv3d, Conv3dConfig, Layer, Linear, LinearConfig,
};
pub use crate::verify::{LayerPairWeights, Verifier};
pub use crate::wider::{widen, ReplicationMap, Widened};
