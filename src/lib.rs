//! Fleet Scheduling solve orchestration
//!
//! Drives a declarative combinatorial engine over a preprocessed fleet
//! instance, either in one time-bounded attempt or period by period, and
//! writes the best model and the engine statistics.
//!
//! # Components
//!
//! - [`Fact`](facts::Fact), [`Instance`](facts::Instance), [`Model`](facts::Model): the fact model
//! - [`Engine`](engine::Engine): capability interface over the solving engine
//! - [`TimeBoundExecutor`](executor::TimeBoundExecutor): one grounding and solving attempt under a budget
//! - [`IterativeScheduler`](scheduler::IterativeScheduler): bounded period loop committing decisions
//! - [`aggregate`]: cost augmentation and artifact output
//! - [`ScriptedEngine`](scripted::ScriptedEngine): in-process simulated engine

pub mod aggregate;
pub mod console;
pub mod demo_data;
pub mod engine;
pub mod error;
pub mod executor;
pub mod facts;
pub mod scheduler;
pub mod scripted;
pub mod solver;
