//! # hs-optimizer
//!
//! Asynchronous surrogate-driven search coordination for hypersearch.
//!
//! A [`Coordinator`] hands candidates to workers through an [`OfferChannel`],
//! tracks their reports, refits a surrogate model in the background once
//! enough evaluations have finished, and generates new proposals in the
//! background from that model. Stale proposals are discarded whenever a
//! fresher model is adopted.

mod acquisition;
mod book;
mod bootstrap;
mod coordinator;
mod generation;
mod lab;
mod model;
mod offer;
mod refit;

pub use acquisition::{
    build_acquisition, AcquisitionContext, AcquisitionFunction, ExpectedImprovement,
    ProbabilityOfImprovement,
};
pub use book::{CandidateBook, Transition};
pub use bootstrap::BootstrapSampler;
pub use coordinator::{
    Coordinator, CoordinatorHandle, CoordinatorReport, CoordinatorSnapshot, StepSummary,
};
pub use lab::Lab;
pub use model::{
    FitInput, GaussianProcess, GaussianProcessFitter, ModelFitter, ModelHandle, Prediction,
    SurrogateModel,
};
pub use offer::OfferChannel;
