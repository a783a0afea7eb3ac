// Services layer
// Services own business logic and validation, calling storage directly

pub mod run;

pub use run::RunService;
