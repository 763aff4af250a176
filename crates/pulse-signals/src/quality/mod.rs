//! Signal-quality assessment: binary beat-window acceptance and the
//! band-integrated SNR / confidence estimator.

pub(crate) mod binary;
pub(crate) mod snr;

pub use snr::SnrEstimator;
