//! API handlers for the storno pipeline

pub mod eligibility;
pub mod storno;

pub use eligibility::get_storno_eligibility;
pub use storno::{
    decide_storno_request, get_storno_request, list_storno_requests,
    open_storno_request_for_review, reconcile_storno_requests, submit_storno_request,
};
