//! # Model Scanner
//!
//! Reads `apps/<app>/models.rs` with `syn` and produces
//! [`ModelDescriptor`]s without compiling the application.
//!
//! A struct is a model when it derives `Model` or embeds a `BaseModel`
//! field. The embedded `BaseModel` contributes the standard columns and is
//! not reported as a field; a derive-only model gets exactly its own
//! fields. Fields tagged `#[orm(skip)]` are ignored. Raw identifiers lose
//! their `r#` prefix, as in `#[derive(Model)]`.

use super::descriptor::{FieldDescriptor, FieldTag, ModelDescriptor};
use crate::error::{Error, Result};
use crate::models::BaseModel;
use quote::ToTokens;
use std::collections::HashSet;
use std::path::Path;
use syn::ext::IdentExt;
use syn::{Attribute, Fields, Item, ItemStruct, Lit, Type};

/// File holding an application's models
pub const MODELS_FILE: &str = "models.rs";

/// Scan `<app_dir>/models.rs`
///
/// A missing file means the application has no models yet.
///
/// # Errors
///
/// Returns `Error::ModelParse` when the file exists but is not valid Rust
/// or carries malformed `#[orm(...)]` attributes, and `Error::Io` when it
/// cannot be read.
pub fn scan_app(app_dir: &Path) -> Result<Vec<ModelDescriptor>> {
    let path = app_dir.join(MODELS_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let source = std::fs::read_to_string(&path)?;
    scan_source(&source, &path)
}

/// Scan model definitions from source text; `path` is used in errors
///
/// # Errors
///
/// Returns `Error::ModelParse` on invalid source or attributes.
pub fn scan_source(source: &str, path: &Path) -> Result<Vec<ModelDescriptor>> {
    let parse_error = |e: &syn::Error| Error::ModelParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let file = syn::parse_file(source).map_err(|e| parse_error(&e))?;
    let mut models = Vec::new();
    collect_models(&file.items, &mut models).map_err(|e| parse_error(&e))?;
    Ok(models)
}

fn collect_models(items: &[Item], models: &mut Vec<ModelDescriptor>) -> syn::Result<()> {
    for item in items {
        match item {
            Item::Struct(item) if is_model(item)? => models.push(describe(item)?),
            Item::Mod(module) => {
                if let Some((_, nested)) = &module.content {
                    collect_models(nested, models)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_model(item: &ItemStruct) -> syn::Result<bool> {
    for attr in item.attrs.iter().filter(|a| a.path().is_ident("derive")) {
        let mut derives_model = false;
        attr.parse_nested_meta(|meta| {
            if meta.path.segments.last().is_some_and(|s| s.ident == "Model") {
                derives_model = true;
            }
            Ok(())
        })?;
        if derives_model {
            return Ok(true);
        }
    }

    Ok(match &item.fields {
        Fields::Named(named) => named.named.iter().any(|f| is_base_model(&f.ty)),
        _ => false,
    })
}

fn is_base_model(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|s| s.ident == "BaseModel"),
        _ => false,
    }
}

fn describe(item: &ItemStruct) -> syn::Result<ModelDescriptor> {
    let mut fields = Vec::new();
    let mut base_model = false;
    let mut columns: HashSet<String> = HashSet::new();

    if let Fields::Named(named) = &item.fields {
        base_model = named.named.iter().any(|f| is_base_model(&f.ty));
        if base_model {
            columns.extend(BaseModel::COLUMNS.iter().map(ToString::to_string));
        }

        for field in &named.named {
            if is_base_model(&field.ty) {
                continue;
            }
            let Some(ident) = &field.ident else {
                continue;
            };
            let tag = parse_tag(&field.attrs)?;
            if tag.has("skip") {
                continue;
            }
            let descriptor =
                FieldDescriptor::new(ident.unraw().to_string(), render_type(&field.ty), tag.to_string());

            let column = descriptor.column_name();
            if !columns.insert(column.clone()) {
                let owner = if base_model && BaseModel::COLUMNS.contains(&column.as_str()) {
                    "`BaseModel`".to_string()
                } else {
                    "another field".to_string()
                };
                return Err(syn::Error::new_spanned(
                    ident,
                    format!("column `{column}` of `{}` is already provided by {owner}", item.ident),
                ));
            }
            fields.push(descriptor);
        }
    }

    if fields.is_empty() && !base_model {
        return Err(syn::Error::new_spanned(
            &item.ident,
            format!("model `{}` has no columns", item.ident),
        ));
    }

    Ok(ModelDescriptor::new(item.ident.unraw().to_string(), fields).with_base_model(base_model))
}

/// Merge every `#[orm(...)]` attribute into one canonical tag
fn parse_tag(attrs: &[Attribute]) -> syn::Result<FieldTag> {
    let mut tag = FieldTag::new();

    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            let key = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .ok_or_else(|| meta.error("expected a plain key"))?;
            if meta.input.peek(syn::Token![=]) {
                let lit: Lit = meta.value()?.parse()?;
                tag.insert(key, Some(lit_text(&lit)));
            } else {
                tag.insert(key, None);
            }
            Ok(())
        })?;
    }

    Ok(tag)
}

fn lit_text(lit: &Lit) -> String {
    match lit {
        Lit::Str(s) => s.value(),
        Lit::Int(i) => i.base10_digits().to_string(),
        Lit::Float(f) => f.base10_digits().to_string(),
        Lit::Bool(b) => b.value.to_string(),
        other => other.to_token_stream().to_string(),
    }
}

/// Canonical type text: token spacing removed except between words
///
/// `Option < chrono :: DateTime < Utc > >` -> `Option<chrono::DateTime<Utc>>`,
/// `& 'static str` -> `&'static str`.
#[must_use]
pub fn render_type(ty: &Type) -> String {
    let raw = ty.to_token_stream().to_string();
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());

    for (i, &c) in chars.iter().enumerate() {
        if c.is_whitespace() {
            let prev = out.chars().last();
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if let (Some(prev), Some(next)) = (prev, next) {
                if is_word_char(prev) && is_word_char(*next) && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

const fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MODELS: &str = r#"
        use bourbon_core::models::BaseModel;

        #[derive(Debug, Model)]
        pub struct User {
            #[orm(size = 120)]
            pub name: String,
            #[orm(unique)]
            #[orm(size = 255)]
            pub email: String,
            pub nickname: Option<String>,
            pub joined: chrono::DateTime<chrono::Utc>,
            #[orm(skip)]
            pub cache: Vec<String>,
        }

        pub struct Post {
            pub base: BaseModel,
            pub title: String,
        }

        pub struct NotAModel {
            pub value: i32,
        }

        mod nested {
            #[derive(bourbon::Model)]
            struct Tag {
                label: &'static str,
            }
        }
    "#;

    fn scan() -> Vec<ModelDescriptor> {
        scan_source(MODELS, &PathBuf::from("apps/blog/models.rs")).unwrap()
    }

    #[test]
    fn test_detects_models() {
        let names: Vec<String> = scan().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["User", "Post", "Tag"]);
    }

    #[test]
    fn test_field_descriptors() {
        let models = scan();
        let user = &models[0];

        let fields: Vec<(&str, &str, &str)> = user
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.type_signature.as_str(), f.tag.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("name", "String", "size = 120"),
                ("email", "String", "size = 255, unique"),
                ("nickname", "Option<String>", ""),
                ("joined", "chrono::DateTime<chrono::Utc>", ""),
            ]
        );
    }

    #[test]
    fn test_base_model_field_is_excluded() {
        let models = scan();
        let post = &models[1];
        assert_eq!(post.fields.len(), 1);
        assert_eq!(post.fields[0].name, "title");
        assert_eq!(models[2].fields[0].type_signature, "&'static str");
    }

    #[test]
    fn test_base_model_flag() {
        let models = scan();
        assert!(!models[0].base_model);
        assert!(models[1].base_model);
    }

    #[test]
    fn test_derive_only_model_may_declare_id() {
        let source = "#[derive(Model)] pub struct Account { pub id: i64, pub name: String }";
        let models = scan_source(source, &PathBuf::from("m.rs")).unwrap();
        assert!(!models[0].base_model);
        assert_eq!(models[0].fields[0].column_name(), "id");
    }

    #[test]
    fn test_base_column_collision_is_an_error() {
        let source = "#[derive(Model)] pub struct Account { pub base: BaseModel, pub id: i64 }";
        let err = scan_source(source, &PathBuf::from("m.rs")).unwrap_err();
        assert!(err.to_string().contains("already provided by `BaseModel`"));

        let renamed = r#"#[derive(Model)] pub struct Account {
            pub base: BaseModel,
            #[orm(column = "created_at")]
            pub opened: String,
        }"#;
        assert!(scan_source(renamed, &PathBuf::from("m.rs")).is_err());
    }

    #[test]
    fn test_duplicate_field_columns_are_an_error() {
        let source = r#"#[derive(Model)] pub struct Item {
            pub title: String,
            #[orm(column = "title")]
            pub heading: String,
        }"#;
        assert!(matches!(
            scan_source(source, &PathBuf::from("m.rs")),
            Err(Error::ModelParse { .. })
        ));
    }

    #[test]
    fn test_model_without_columns_is_an_error() {
        let source = "#[derive(Model)] pub struct Empty { #[orm(skip)] pub cache: Vec<u8> }";
        assert!(scan_source(source, &PathBuf::from("m.rs")).is_err());
    }

    #[test]
    fn test_raw_identifiers_are_unprefixed() {
        let source = "#[derive(Model)] pub struct Item { pub r#type: String, pub name: String }";
        let models = scan_source(source, &PathBuf::from("m.rs")).unwrap();
        assert_eq!(models[0].fields[0].name, "type");
        assert_eq!(models[0].fields[0].column_name(), "type");
    }

    #[test]
    fn test_parse_failure_is_an_error() {
        let result = scan_source("pub struct User { name: String", &PathBuf::from("m.rs"));
        assert!(matches!(result, Err(Error::ModelParse { .. })));
    }

    #[test]
    fn test_malformed_orm_attribute_is_an_error() {
        let source = "#[derive(Model)] struct A { #[orm(size = )] name: String }";
        assert!(scan_source(source, &PathBuf::from("m.rs")).is_err());
    }

    #[test]
    fn test_missing_models_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_app(dir.path()).unwrap().is_empty());
    }
}
