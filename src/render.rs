//! Screen assembly from templates, mapped cache values and menu entries.
//!
//! During a run the interpreter records which cache keys were mapped and
//! which menu entries were defined. Rendering expands `{{key}}` markers in
//! the current symbol's template with the mapped values and appends the menu
//! as `selector:label` lines, paging entries last.

use crate::cache::Cache;
use crate::errors::EngineError;

/// One selectable menu line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub selector: String,
    pub label: String,
}

/// Render inputs accumulated while executing one screen.
#[derive(Debug, Default)]
pub struct RenderContext {
    maps: Vec<String>,
    menu: Vec<MenuEntry>,
    next: Option<MenuEntry>,
    prev: Option<MenuEntry>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes a cached key to template expansion.
    pub fn add_map(&mut self, sym: &str) {
        if !self.maps.iter().any(|m| m == sym) {
            self.maps.push(sym.to_string());
        }
    }

    /// Appends a menu entry.
    pub fn add_menu(&mut self, selector: &str, label: &str) {
        self.menu.push(MenuEntry {
            selector: selector.to_string(),
            label: label.to_string(),
        });
    }

    /// Sets the forward paging entry.
    pub fn set_next(&mut self, selector: &str, label: &str) {
        self.next = Some(MenuEntry {
            selector: selector.to_string(),
            label: label.to_string(),
        });
    }

    /// Sets the backward paging entry.
    pub fn set_prev(&mut self, selector: &str, label: &str) {
        self.prev = Some(MenuEntry {
            selector: selector.to_string(),
            label: label.to_string(),
        });
    }

    /// Mapped keys, in mapping order.
    pub fn maps(&self) -> &[String] {
        &self.maps
    }

    /// Clears everything, ready for the next screen.
    pub fn reset(&mut self) {
        self.maps.clear();
        self.menu.clear();
        self.next = None;
        self.prev = None;
    }
}

/// Expands a template against the render context and cache.
///
/// `max_size` of zero disables the output cap; otherwise exceeding it is an
/// error the engine treats as fatal.
pub fn render(
    template: &str,
    ctx: &RenderContext,
    cache: &Cache,
    max_size: usize,
) -> Result<String, EngineError> {
    let mut out = template.to_string();
    for sym in &ctx.maps {
        let value = cache.get(sym).ok_or_else(|| EngineError::CacheMiss {
            sym: sym.clone(),
        })?;
        let marker = format!("{{{{{}}}}}", sym);
        out = out.replace(&marker, &String::from_utf8_lossy(value));
    }

    for entry in &ctx.menu {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{}:{}", entry.selector, entry.label));
    }
    for entry in ctx.prev.iter().chain(ctx.next.iter()) {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{}:{}", entry.selector, entry.label));
    }

    if max_size > 0 && out.len() > max_size {
        return Err(EngineError::OutputTooLarge {
            size: out.len(),
            max: max_size,
        });
    }
    Ok(out)
}
