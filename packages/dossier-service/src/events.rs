use std::{
	panic::{AssertUnwindSafe, catch_unwind},
	sync::{Arc, RwLock},
};

use serde_json::{Map, Value};

use crate::observe::ObserveResponse;
use dossier_domain::model::{Profile, Rejection};

#[derive(Clone, Debug)]
pub enum ProfileEvent {
	Update { subject: String, updated: Map<String, Value>, profile: Profile },
	Conflict { subject: String, rejected: Vec<Rejection> },
	ObserveComplete {
		subject: String,
		request_id: String,
		result: Option<Box<ObserveResponse>>,
		error: Option<String>,
	},
}

type Handler = Arc<dyn Fn(&ProfileEvent) + Send + Sync>;

/// Process-wide listener registry. Handlers run synchronously in registration
/// order; a panicking handler is logged and never propagates.
#[derive(Default)]
pub struct EventBus {
	handlers: RwLock<Vec<Handler>>,
}
impl EventBus {
	pub fn subscribe<F>(&self, handler: F)
	where
		F: Fn(&ProfileEvent) + Send + Sync + 'static,
	{
		self.handlers.write().unwrap_or_else(|err| err.into_inner()).push(Arc::new(handler));
	}

	pub fn emit(&self, event: &ProfileEvent) {
		let handlers =
			self.handlers.read().unwrap_or_else(|err| err.into_inner()).clone();

		for handler in handlers {
			if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
				tracing::warn!("An event handler panicked; the event was dropped for it.");
			}
		}
	}
}
