use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Record, ValidationError, require_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Quicklinks,
    Memo,
    Tasks,
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickLink {
    pub url: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// Typed widget body, one variant per widget kind. Stored as the
/// `widget_type` / `content` column pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "widget_type", content = "content", rename_all = "lowercase")]
pub enum WidgetContent {
    Quicklinks {
        #[serde(default)]
        links: Vec<QuickLink>,
    },
    Memo {
        #[serde(default)]
        text: String,
    },
    Tasks {
        #[serde(default)]
        tasks: Vec<ChecklistItem>,
    },
    Schedule {},
}

impl WidgetContent {
    pub fn parse(kind: WidgetKind, content: Value) -> Result<Self, ValidationError> {
        let content = if content.is_null() {
            Value::Object(Default::default())
        } else {
            content
        };
        serde_json::from_value(serde_json::json!({
            "widget_type": kind,
            "content": content,
        }))
        .map_err(|e| ValidationError::invalid("content", e.to_string()))
    }

    pub fn empty(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Quicklinks => Self::Quicklinks { links: Vec::new() },
            WidgetKind::Memo => Self::Memo {
                text: String::new(),
            },
            WidgetKind::Tasks => Self::Tasks { tasks: Vec::new() },
            WidgetKind::Schedule => Self::Schedule {},
        }
    }

    /// The `content` column value.
    pub fn content_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("content").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Quicklinks { links } => {
                for link in links {
                    require_text("links.url", &link.url)?;
                    if url::Url::parse(&link.url).is_err() {
                        return Err(ValidationError::invalid(
                            "links.url",
                            format!("'{}' is not a URL", link.url),
                        ));
                    }
                }
                Ok(())
            }
            Self::Tasks { tasks } => {
                for task in tasks {
                    require_text("tasks.text", &task.text)?;
                }
                Ok(())
            }
            Self::Memo { .. } | Self::Schedule {} => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardWidget {
    pub id: String,
    pub widget_type: WidgetKind,
    pub title: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Record for DashboardWidget {
    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWidget {
    pub widget_type: WidgetKind,
    pub title: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

impl NewWidget {
    pub fn normalize(mut self) -> Result<Self, ValidationError> {
        self.title = self.title.trim().to_string();
        require_text("title", &self.title)?;
        let body = if self.content.is_null() {
            WidgetContent::empty(self.widget_type)
        } else {
            WidgetContent::parse(self.widget_type, self.content)?
        };
        body.validate()?;
        self.content = body.content_value();
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl WidgetPatch {
    /// Content is validated against the stored widget kind, which never changes.
    pub fn normalize(mut self, kind: WidgetKind) -> Result<Self, ValidationError> {
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(content) = self.content.take() {
            let body = WidgetContent::parse(kind, content)?;
            body.validate()?;
            self.content = Some(body.content_value());
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_is_tagged_by_widget_type() {
        let body = WidgetContent::parse(
            WidgetKind::Tasks,
            json!({"tasks": [{"id": "1", "text": "台本チェック", "completed": false}]}),
        )
        .unwrap();
        assert!(matches!(body, WidgetContent::Tasks { .. }));
        assert_eq!(
            body.content_value(),
            json!({"tasks": [{"id": "1", "text": "台本チェック", "completed": false}]})
        );
    }

    #[test]
    fn schedule_content_is_empty_object() {
        let body = WidgetContent::parse(WidgetKind::Schedule, Value::Null).unwrap();
        assert_eq!(body, WidgetContent::Schedule {});
        assert_eq!(body.content_value(), json!({}));
    }

    #[test]
    fn mismatched_content_is_rejected() {
        let err = WidgetContent::parse(WidgetKind::Quicklinks, json!({"links": "nope"}));
        assert!(err.is_err());
    }

    #[test]
    fn new_widget_fills_empty_body_and_checks_links() {
        let widget = NewWidget {
            widget_type: WidgetKind::Memo,
            title: "連絡事項".into(),
            content: Value::Null,
            sort_order: None,
        }
        .normalize()
        .unwrap();
        assert_eq!(widget.content, json!({"text": ""}));

        let bad = NewWidget {
            widget_type: WidgetKind::Quicklinks,
            title: "リンク".into(),
            content: json!({"links": [{"url": "not a url", "label": "x"}]}),
            sort_order: None,
        };
        assert!(bad.normalize().is_err());
    }

    #[test]
    fn widget_type_strings_are_lowercase() {
        let kind: WidgetKind = serde_json::from_value(json!("quicklinks")).unwrap();
        assert_eq!(kind, WidgetKind::Quicklinks);
        assert!(serde_json::from_value::<WidgetKind>(json!("chart")).is_err());
    }
}
