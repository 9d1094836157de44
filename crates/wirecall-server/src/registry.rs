use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use wirecall_common::protocol::{Result, WirecallError};

use crate::handler::Handler;

/// Predicate consulted for every method name at registration time to decide
/// whether it follows the completion protocol.
pub type AsyncCheck = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// What `add_handler` captured for one exposed object.
pub(crate) struct Registration {
    pub handler: Arc<dyn Handler>,
    pub methods: HashSet<String>,
    pub async_methods: HashSet<String>,
}

/// A resolved `object.method` call target.
pub(crate) struct ResolvedCall {
    pub handler: Arc<dyn Handler>,
    pub method: String,
    pub is_async: bool,
}

/// Mapping from exposed object name to its registration.
///
/// Registrations are immutable once created; re-registering a name replaces
/// the whole entry. Async checks apply to registrations made after them, the
/// per-method decision being memoized into `async_methods` at registration.
#[derive(Default)]
pub struct HandlerRegistry {
    objects: HashMap<String, Registration>,
    async_checks: Vec<AsyncCheck>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, capturing its public method set and
    /// evaluating every async check against each method once.
    pub fn add_handler(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let methods: HashSet<String> = handler.methods().into_iter().collect();
        let async_methods = methods
            .iter()
            .filter(|method| self.async_checks.iter().any(|check| check(method)))
            .cloned()
            .collect();

        self.objects.insert(
            name.into(),
            Registration {
                handler,
                methods,
                async_methods,
            },
        );
    }

    pub fn add_async_check(&mut self, check: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.async_checks.push(Box::new(check));
    }

    /// Drops every handler and async check.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.async_checks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Resolves a call expression to its target.
    pub(crate) fn resolve(&self, expr: &str) -> Result<ResolvedCall> {
        let (object, method) = parse_expr(expr);

        let registration = self.objects.get(object).ok_or_else(|| {
            WirecallError::InvalidObject(format!(
                "trying to access non-existent object '{object}'"
            ))
        })?;

        if !registration.methods.contains(method) {
            return Err(WirecallError::InvalidMethod(format!(
                "trying to access non-public method '{method}'"
            )));
        }

        Ok(ResolvedCall {
            handler: registration.handler.clone(),
            method: method.to_string(),
            is_async: registration.async_methods.contains(method),
        })
    }
}

/// Splits a call expression into object name and method name.
///
/// The segment after the last `.` is the method; everything before it is the
/// object name, which may itself contain dots. An expression without a dot
/// yields the empty object name, which no registration can match.
pub fn parse_expr(expr: &str) -> (&str, &str) {
    match expr.rsplit_once('.') {
        Some((object, method)) => (object, method),
        None => ("", expr),
    }
}
