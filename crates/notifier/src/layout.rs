//! Declarative message layout.
//!
//! A `Layout` is an ordered list of labeled fields grouped into sections, plus
//! a header and optional footer. One renderer turns every layout into the
//! box-drawing text Dooray shows, so templates only assemble data.

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: String,
    pub value: String,
}

impl Field {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub heading: Option<String>,
    pub fields: Vec<Field>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titled(heading: impl Into<String>) -> Self {
        Self {
            heading: Some(heading.into()),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(Field::new(label, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub header: String,
    pub sections: Vec<Section>,
    pub footer: Option<String>,
}

impl Layout {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            sections: Vec::new(),
            footer: None,
        }
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.header.clone(), DIVIDER.to_string()];

        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                lines.push(String::new());
            }
            if let Some(heading) = &section.heading {
                lines.push(heading.clone());
            }
            let last = section.fields.len().saturating_sub(1);
            for (j, field) in section.fields.iter().enumerate() {
                let branch = if j == last { '└' } else { '├' };
                lines.push(format!("{} {}: {}", branch, field.label, field.value));
            }
        }

        if let Some(footer) = &self.footer {
            lines.push(DIVIDER.to_string());
            lines.push(footer.clone());
        }

        lines.join("\n")
    }
}
