//! Scriptable in-memory page for executor tests
//!
//! Elements are keyed by their locator string (`#buy`, `text=Continue`).
//! Tests decide which elements are ready, which become ready after a number
//! of probes, and what a click changes.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use storefront_e2e::browser::{Locator, PageDriver};
use storefront_e2e::error::{BrowserError, Result};

/// 1x1 transparent PNG
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Default)]
struct State {
    url: String,
    ready: HashSet<String>,
    /// Remaining probes before an element turns ready
    appears_after: HashMap<String, u32>,
    /// Ready but rejects clicks (e.g. a disabled slot)
    unclickable: HashSet<String>,
    /// Clicking navigates to a URL
    click_navigates: HashMap<String, String>,
    /// Clicking reveals other elements
    click_reveals: HashMap<String, Vec<String>>,
    probes: Vec<String>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    keys: Vec<String>,
    visits: Vec<String>,
    screenshots: usize,
}

#[derive(Default)]
pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready(elements: &[&str]) -> Self {
        let page = Self::new();
        for element in elements {
            page.make_ready(element);
        }
        page
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn make_ready(&self, element: &str) {
        self.state().ready.insert(element.to_string());
    }

    pub fn appears_after(&self, element: &str, probes: u32) {
        self.state().appears_after.insert(element.to_string(), probes);
    }

    pub fn unclickable(&self, element: &str) {
        let mut state = self.state();
        state.ready.insert(element.to_string());
        state.unclickable.insert(element.to_string());
    }

    pub fn click_navigates(&self, element: &str, url: &str) {
        self.state()
            .click_navigates
            .insert(element.to_string(), url.to_string());
    }

    pub fn click_reveals(&self, element: &str, revealed: &[&str]) {
        self.state().click_reveals.insert(
            element.to_string(),
            revealed.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state().fills.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().keys.clone()
    }

    pub fn visits(&self) -> Vec<String> {
        self.state().visits.clone()
    }

    pub fn probes(&self) -> Vec<String> {
        self.state().probes.clone()
    }

    pub fn screenshots(&self) -> usize {
        self.state().screenshots
    }

    fn require_ready(state: &State, key: &str) -> Result<()> {
        if state.ready.contains(key) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(key.to_string()))
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.state();
        state.url = url.to_string();
        state.visits.push(url.to_string());
        Ok(())
    }

    async fn is_ready(&self, locator: &Locator) -> Result<bool> {
        let key = locator.to_string();
        let mut state = self.state();
        state.probes.push(key.clone());

        if let Some(remaining) = state.appears_after.get_mut(&key) {
            if *remaining == 0 {
                state.appears_after.remove(&key);
                state.ready.insert(key.clone());
            } else {
                *remaining -= 1;
            }
        }
        Ok(state.ready.contains(&key))
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let key = locator.to_string();
        let mut state = self.state();
        Self::require_ready(&state, &key)?;
        if state.unclickable.contains(&key) {
            return Err(BrowserError::NotInteractable(key));
        }

        state.clicks.push(key.clone());
        if let Some(url) = state.click_navigates.get(&key).cloned() {
            state.url = url;
        }
        if let Some(revealed) = state.click_reveals.get(&key).cloned() {
            state.ready.extend(revealed);
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let key = locator.to_string();
        let mut state = self.state();
        Self::require_ready(&state, &key)?;
        state.fills.push((key, value.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.state().keys.push(key.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state().url.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.state().screenshots += 1;
        Ok(PNG.to_vec())
    }
}
