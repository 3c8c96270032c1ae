// src/lib.rs

use services::price_model::PriceModelService;

#[derive(Clone)]
pub struct AppState {
    pub price_model: PriceModelService,
}

pub mod error;
pub mod stores;

pub mod services {
    pub mod artifact_store;
    pub mod chart;
    pub mod features;
    pub mod fingerprint;
    pub mod job_runner;
    pub mod predictor;
    pub mod price_model;
    pub mod scaler;
    pub mod trainer;
}

pub mod models;
pub mod handlers;
