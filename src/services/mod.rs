pub mod allocation_service;
pub mod clustering;
pub mod failure_cache;
pub mod optimization_cache;
pub mod optimization_service;
pub mod price_service;
pub mod risk_service;
