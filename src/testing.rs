//! In-memory mailbox gateway for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gateway::{GatewayError, GatewayErrorKind, GatewayResult, MailboxGateway};
use crate::labels::LabelDelta;

/// Gateway call as observed by [`FakeGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetLabels(String),
    BatchModify(Vec<String>),
    ModifySingle(String),
    BatchDelete(Vec<String>),
    Trash(String),
    Untrash(String),
}

#[derive(Debug, Default)]
struct State {
    labels: HashMap<String, Vec<String>>,
    batch_modify_error: Option<GatewayError>,
    batch_delete_error: Option<GatewayError>,
    ignored_by_bulk: HashSet<String>,
    get_labels_errors: HashMap<String, GatewayError>,
    single_errors: HashMap<String, GatewayError>,
    calls: Vec<Call>,
}

/// Mailbox held in memory, with scriptable failures and a call log
///
/// Unknown IDs answer `NotFound`, and a bulk modify naming one fails as a
/// whole, the way the real service does.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(self, id: &str, labels: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .labels
            .insert(id.to_owned(), labels.iter().map(|l| (*l).to_owned()).collect());
        self
    }

    pub fn with_messages<'a>(
        mut self,
        ids: impl IntoIterator<Item = &'a String>,
        labels: &[&str],
    ) -> Self {
        for id in ids {
            self = self.with_message(id, labels);
        }
        self
    }

    /// Every `batch_modify` call fails with `err`
    pub fn failing_batch_modify(self, err: GatewayError) -> Self {
        self.state.lock().unwrap().batch_modify_error = Some(err);
        self
    }

    pub fn failing_batch_delete(self, err: GatewayError) -> Self {
        self.state.lock().unwrap().batch_delete_error = Some(err);
        self
    }

    /// `batch_modify` reports success but leaves `id` untouched
    pub fn ignoring_in_bulk(self, id: &str) -> Self {
        self.state.lock().unwrap().ignored_by_bulk.insert(id.to_owned());
        self
    }

    pub fn failing_get_labels(self, id: &str, err: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .get_labels_errors
            .insert(id.to_owned(), err);
        self
    }

    pub fn failing_single(self, id: &str, err: GatewayError) -> Self {
        self.state
            .lock()
            .unwrap()
            .single_errors
            .insert(id.to_owned(), err);
        self
    }

    pub fn labels(&self, id: &str) -> Option<Vec<String>> {
        self.state.lock().unwrap().labels.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn batch_modify_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::BatchModify(ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }
}

pub fn not_found(id: &str) -> GatewayError {
    GatewayError::new(
        GatewayErrorKind::NotFound,
        Some(404),
        format!("gmail api request failed (404): message {id} not found"),
    )
}

pub fn unavailable() -> GatewayError {
    GatewayError::new(
        GatewayErrorKind::Unavailable,
        Some(503),
        "gmail api request failed (503): backend error",
    )
}

pub fn unauthorized() -> GatewayError {
    GatewayError::new(
        GatewayErrorKind::Unauthorized,
        Some(401),
        "gmail api request failed (401): invalid credentials",
    )
}

fn apply(labels: &mut Vec<String>, delta: &LabelDelta) {
    labels.retain(|label| !delta.remove.contains(label));
    for label in &delta.add {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
}

#[async_trait]
impl MailboxGateway for FakeGateway {
    async fn get_labels(&self, id: &str) -> GatewayResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetLabels(id.to_owned()));
        if let Some(err) = state.get_labels_errors.get(id) {
            return Err(err.clone());
        }
        state.labels.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn batch_modify(&self, ids: &[String], delta: &LabelDelta) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::BatchModify(ids.to_vec()));
        if let Some(err) = &state.batch_modify_error {
            return Err(err.clone());
        }
        if let Some(missing) = ids.iter().find(|id| !state.labels.contains_key(*id)) {
            return Err(not_found(missing));
        }
        for id in ids {
            if state.ignored_by_bulk.contains(id) {
                continue;
            }
            if let Some(labels) = state.labels.get_mut(id) {
                apply(labels, delta);
            }
        }
        Ok(())
    }

    async fn modify_single(&self, id: &str, delta: &LabelDelta) -> GatewayResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ModifySingle(id.to_owned()));
        if let Some(err) = state.single_errors.get(id) {
            return Err(err.clone());
        }
        let labels = state.labels.get_mut(id).ok_or_else(|| not_found(id))?;
        apply(labels, delta);
        Ok(labels.clone())
    }

    async fn batch_delete(&self, ids: &[String]) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::BatchDelete(ids.to_vec()));
        if let Some(err) = &state.batch_delete_error {
            return Err(err.clone());
        }
        for id in ids {
            state.labels.remove(id);
        }
        Ok(())
    }

    async fn trash(&self, id: &str) -> GatewayResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Trash(id.to_owned()));
        let labels = state.labels.get_mut(id).ok_or_else(|| not_found(id))?;
        apply(labels, &LabelDelta::resolve(vec!["TRASH".into()], vec!["INBOX".into()]));
        Ok(labels.clone())
    }

    async fn untrash(&self, id: &str) -> GatewayResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Untrash(id.to_owned()));
        let labels = state.labels.get_mut(id).ok_or_else(|| not_found(id))?;
        apply(labels, &LabelDelta::resolve(vec![], vec!["TRASH".into()]));
        Ok(labels.clone())
    }
}
