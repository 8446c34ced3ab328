//! Headless document model
//!
//! The small slice of a browser document the runtime touches: elements by id
//! with class lists, visibility, inner markup, attributes and event
//! listeners, plus the location fragment and a history stack. The router and
//! components manipulate it; tests inspect it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from document operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("No element with id: {0}")]
    NotFound(String),

    #[error("Element id already in use: {0}")]
    Duplicate(String),

    #[error("Listener {listener} not attached to element {element}")]
    ListenerNotFound { element: String, listener: u64 },
}

/// Identity of one attached DOM listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomListenerId(u64);

impl DomListenerId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Event delivered to DOM listeners
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub kind: String,
    pub target: String,
    pub detail: Value,
}

pub type DomHandler = Arc<dyn Fn(&DomEvent) + Send + Sync>;

struct ElementData {
    tag: String,
    classes: Vec<String>,
    hidden: bool,
    html: String,
    attributes: BTreeMap<String, String>,
    parent: Option<String>,
    children: Vec<String>,
    listeners: Vec<(DomListenerId, String, DomHandler)>,
}

impl ElementData {
    fn new(tag: &str, parent: Option<String>) -> Self {
        Self {
            tag: tag.to_string(),
            classes: Vec::new(),
            hidden: false,
            html: String::new(),
            attributes: BTreeMap::new(),
            parent,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Default)]
struct DocumentState {
    title: String,
    elements: HashMap<String, ElementData>,
    fragment: Option<String>,
    history: Vec<Option<String>>,
    next_listener: u64,
}

/// Shared handle to one document
#[derive(Clone, Default)]
pub struct Document {
    state: Arc<Mutex<DocumentState>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.lock().title = title.into();
    }

    /// Add a top-level element
    pub fn create_element(&self, id: &str, tag: &str) -> Result<Element, DomError> {
        self.insert(id, tag, None)
    }

    /// Add an element under `parent`
    pub fn append_child(&self, parent: &str, id: &str, tag: &str) -> Result<Element, DomError> {
        self.insert(id, tag, Some(parent))
    }

    fn insert(&self, id: &str, tag: &str, parent: Option<&str>) -> Result<Element, DomError> {
        let mut state = self.lock();
        if state.elements.contains_key(id) {
            return Err(DomError::Duplicate(id.to_string()));
        }
        if let Some(parent) = parent {
            let data = state
                .elements
                .get_mut(parent)
                .ok_or_else(|| DomError::NotFound(parent.to_string()))?;
            data.children.push(id.to_string());
        }
        state
            .elements
            .insert(id.to_string(), ElementData::new(tag, parent.map(str::to_string)));
        debug!(id, tag, ?parent, "Document: element created");
        Ok(Element {
            doc: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<Element> {
        self.lock().elements.contains_key(id).then(|| Element {
            doc: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn require(&self, id: &str) -> Result<Element, DomError> {
        self.get_element_by_id(id).ok_or_else(|| DomError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().elements.contains_key(id)
    }

    /// Remove an element and its subtree; returns how many elements went away
    pub fn remove(&self, id: &str) -> usize {
        let mut state = self.lock();
        let parent = match state.elements.get(id) {
            Some(data) => data.parent.clone(),
            None => return 0,
        };
        if let Some(parent) = parent {
            if let Some(data) = state.elements.get_mut(&parent) {
                data.children.retain(|c| c != id);
            }
        }
        remove_subtree(&mut state, id)
    }

    /// Ids of elements carrying `class`, sorted
    pub fn ids_with_class(&self, class: &str) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state
            .elements
            .iter()
            .filter(|(_, data)| data.classes.iter().any(|c| c == class))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Current location fragment, without the leading `#`
    pub fn fragment(&self) -> Option<String> {
        self.lock().fragment.clone()
    }

    /// Change the fragment without touching history
    pub fn replace_fragment(&self, fragment: Option<&str>) {
        self.lock().fragment = fragment.map(normalize_fragment);
    }

    /// Push the current location and move to `fragment`
    pub fn push_state(&self, fragment: &str) {
        let mut state = self.lock();
        let previous = state.fragment.take();
        state.history.push(previous);
        state.fragment = Some(normalize_fragment(fragment));
    }

    /// Pop one history entry; returns the restored fragment, `None` if history is empty
    pub fn back(&self) -> Option<Option<String>> {
        let mut state = self.lock();
        let previous = state.history.pop()?;
        state.fragment = previous.clone();
        Some(previous)
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Document")
            .field("title", &state.title)
            .field("elements", &state.elements.len())
            .field("fragment", &state.fragment)
            .finish()
    }
}

fn normalize_fragment(fragment: &str) -> String {
    fragment.trim_start_matches('#').to_string()
}

fn remove_subtree(state: &mut DocumentState, id: &str) -> usize {
    let Some(data) = state.elements.remove(id) else {
        return 0;
    };
    1 + data.children.iter().map(|child| remove_subtree(state, child)).sum::<usize>()
}

/// Handle to an element by id; operations fail once the element is removed
#[derive(Clone)]
pub struct Element {
    doc: Document,
    id: String,
}

impl Element {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn exists(&self) -> bool {
        self.doc.contains(&self.id)
    }

    fn with<T>(&self, f: impl FnOnce(&mut ElementData) -> T) -> Result<T, DomError> {
        let mut state = self.doc.lock();
        let data = state
            .elements
            .get_mut(&self.id)
            .ok_or_else(|| DomError::NotFound(self.id.clone()))?;
        Ok(f(data))
    }

    pub fn tag(&self) -> Result<String, DomError> {
        self.with(|d| d.tag.clone())
    }

    pub fn add_class(&self, class: &str) -> Result<(), DomError> {
        self.with(|d| {
            if !d.classes.iter().any(|c| c == class) {
                d.classes.push(class.to_string());
            }
        })
    }

    pub fn remove_class(&self, class: &str) -> Result<(), DomError> {
        self.with(|d| d.classes.retain(|c| c != class))
    }

    pub fn toggle_class(&self, class: &str, on: bool) -> Result<(), DomError> {
        if on { self.add_class(class) } else { self.remove_class(class) }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.with(|d| d.classes.iter().any(|c| c == class)).unwrap_or(false)
    }

    pub fn classes(&self) -> Vec<String> {
        self.with(|d| d.classes.clone()).unwrap_or_default()
    }

    pub fn set_hidden(&self, hidden: bool) -> Result<(), DomError> {
        self.with(|d| d.hidden = hidden)
    }

    pub fn is_hidden(&self) -> bool {
        self.with(|d| d.hidden).unwrap_or(true)
    }

    pub fn set_html(&self, html: impl Into<String>) -> Result<(), DomError> {
        let html = html.into();
        self.with(|d| d.html = html)
    }

    pub fn html(&self) -> String {
        self.with(|d| d.html.clone()).unwrap_or_default()
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) -> Result<(), DomError> {
        let value = value.into();
        self.with(|d| {
            d.attributes.insert(name.to_string(), value);
        })
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.with(|d| d.attributes.get(name).cloned()).ok().flatten()
    }

    pub fn children(&self) -> Vec<String> {
        self.with(|d| d.children.clone()).unwrap_or_default()
    }

    /// Append a child element
    pub fn append(&self, id: &str, tag: &str) -> Result<Element, DomError> {
        self.doc.append_child(&self.id, id, tag)
    }

    /// Empty the markup and remove every child element
    pub fn clear(&self) -> Result<(), DomError> {
        let children = self.with(|d| {
            d.html.clear();
            std::mem::take(&mut d.children)
        })?;
        let mut state = self.doc.lock();
        for child in &children {
            remove_subtree(&mut state, child);
        }
        Ok(())
    }

    pub fn add_listener<F>(&self, kind: &str, handler: F) -> Result<DomListenerId, DomError>
    where
        F: Fn(&DomEvent) + Send + Sync + 'static,
    {
        let mut state = self.doc.lock();
        let id = DomListenerId(state.next_listener);
        let data = state
            .elements
            .get_mut(&self.id)
            .ok_or_else(|| DomError::NotFound(self.id.clone()))?;
        data.listeners.push((id, kind.to_string(), Arc::new(handler)));
        state.next_listener += 1;
        Ok(id)
    }

    pub fn remove_listener(&self, listener: DomListenerId) -> Result<(), DomError> {
        let removed = self.with(|d| {
            let before = d.listeners.len();
            d.listeners.retain(|(id, _, _)| *id != listener);
            before != d.listeners.len()
        })?;
        if removed {
            Ok(())
        } else {
            Err(DomError::ListenerNotFound {
                element: self.id.clone(),
                listener: listener.0,
            })
        }
    }

    pub fn listener_count(&self) -> usize {
        self.with(|d| d.listeners.len()).unwrap_or(0)
    }

    /// Deliver an event to this element's listeners for `kind`; returns how many ran
    pub fn dispatch(&self, kind: &str, detail: Value) -> usize {
        let handlers: Vec<DomHandler> = self
            .with(|d| {
                d.listeners
                    .iter()
                    .filter(|(_, k, _)| k == kind)
                    .map(|(_, _, h)| h.clone())
                    .collect()
            })
            .unwrap_or_default();
        let event = DomEvent {
            kind: kind.to_string(),
            target: self.id.clone(),
            detail,
        };
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element").field("id", &self.id).finish()
    }
}
