//! Static checklist reference data, pagination and completeness checks.

use std::sync::LazyLock;

use regex::Regex;

use crate::record::{FieldKey, Fields};

pub const DEFAULT_ITEMS_PER_PAGE: usize = 2;

pub const APPROVAL_OPTIONS: &[&str] = &["Aprobado", "No aprobado", "No aplica"];

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern"));
static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b").expect("img pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistItem {
    pub id: u32,
    pub label: &'static str,
    pub expectation: &'static str,
}

pub const ITEMS: &[ChecklistItem] = &[
    ChecklistItem {
        id: 1,
        label: "Autenticación OAuth 2.0/OpenID Connect implementada",
        expectation: "El sistema debe autenticar usando OAuth 2.0 o OpenID Connect, siguiendo los estándares de seguridad.",
    },
    ChecklistItem {
        id: 2,
        label: "Uso de tokens JWT válidos",
        expectation: "Las peticiones deben incluir tokens JWT válidos y no expirados.",
    },
    ChecklistItem {
        id: 3,
        label: "Comunicación solo por HTTPS",
        expectation: "Todas las comunicaciones con la API deben realizarse exclusivamente por HTTPS.",
    },
    ChecklistItem {
        id: 4,
        label: "Gestión de expiración y refresh de tokens",
        expectation: "El sistema debe manejar la expiración de tokens y usar refresh tokens cuando corresponda.",
    },
    ChecklistItem {
        id: 5,
        label: "Almacenamiento seguro de credenciales",
        expectation: "Las credenciales y secretos deben almacenarse de forma segura y nunca exponerse públicamente.",
    },
    ChecklistItem {
        id: 6,
        label: "Solicita solo los permisos necesarios",
        expectation: "El sistema debe solicitar únicamente los permisos (scopes) estrictamente necesarios.",
    },
    ChecklistItem {
        id: 7,
        label: "Respeta restricciones de acceso",
        expectation: "El sistema debe respetar las restricciones de acceso según los permisos otorgados.",
    },
    ChecklistItem {
        id: 8,
        label: "Manejo de errores y límites de uso",
        expectation: "El sistema debe manejar correctamente errores y límites de uso (rate limiting).",
    },
    ChecklistItem {
        id: 9,
        label: "Pruebas de integración y seguridad realizadas",
        expectation: "Se deben realizar pruebas de integración y seguridad con la API.",
    },
    ChecklistItem {
        id: 10,
        label: "Documentación revisada y comprendida",
        expectation: "El equipo debe haber revisado y comprendido la documentación de autenticación y autorización.",
    },
];

pub fn item(id: u32) -> Option<&'static ChecklistItem> {
    ITEMS.iter().find(|i| i.id == id)
}

/// 1-based pages over a fixed item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    items_per_page: usize,
    total_items: usize,
}

impl Pager {
    pub fn new(items_per_page: usize, total_items: usize) -> Self {
        Self {
            items_per_page: items_per_page.max(1),
            total_items,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.items_per_page).max(1)
    }

    pub fn clamp(&self, page: usize) -> usize {
        page.clamp(1, self.total_pages())
    }

    pub fn page_of(&self, index: usize) -> usize {
        index / self.items_per_page + 1
    }

    pub fn range(&self, page: usize) -> std::ops::Range<usize> {
        let page = self.clamp(page);
        let start = (page - 1) * self.items_per_page;
        let end = (start + self.items_per_page).min(self.total_items);
        start.min(end)..end
    }
}

pub fn page_items(pager: &Pager, page: usize) -> &'static [ChecklistItem] {
    &ITEMS[pager.range(page)]
}

fn value<'a>(fields: &'a Fields, key: FieldKey) -> &'a str {
    fields.get(&key.to_string()).map(String::as_str).unwrap_or("")
}

/// Sidebar-level completeness: a verdict is chosen and evidence is not blank.
pub fn is_complete(fields: &Fields, item_id: u32) -> bool {
    !value(fields, FieldKey::aprobado(item_id)).is_empty()
        && !value(fields, FieldKey::evidencias(item_id)).trim().is_empty()
}

/// Evidence counts as present when it has visible text or an embedded image.
pub fn evidence_has_content(markup: &str) -> bool {
    if IMG_RE.is_match(markup) {
        return true;
    }
    let text = TAG_RE.replace_all(markup, "");
    let text = text.replace("&nbsp;", " ");
    !text.trim().is_empty()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub missing: Vec<u32>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_valid() {
            return "all checklist items are complete".into();
        }
        let ids = self
            .missing
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("items still incomplete: {ids}")
    }
}

pub fn validate(fields: &Fields) -> Validation {
    let missing = ITEMS
        .iter()
        .filter(|item| {
            value(fields, FieldKey::aprobado(item.id)).is_empty()
                || !evidence_has_content(value(fields, FieldKey::evidencias(item.id)))
        })
        .map(|item| item.id)
        .collect();
    Validation { missing }
}
