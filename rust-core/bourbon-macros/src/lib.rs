//! # Bourbon Macros
//!
//! Procedural macros for Bourbon models.
//!
//! `#[derive(Model)]` implements `bourbon_core::models::Model` for a struct
//! with named fields. The same `#[orm(...)]` attributes are read by the
//! migration scanner; here only `skip` and `column` matter:
//!
//! ```ignore
//! #[derive(Model)]
//! pub struct User {
//!     pub base: BaseModel,
//!     #[orm(size = 120)]
//!     pub name: String,
//!     #[orm(column = "mail", unique)]
//!     pub email: String,
//!     #[orm(skip)]
//!     pub cached_score: f64,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::ext::IdentExt;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Lit, Type};

/// Derive `bourbon_core::models::Model`
#[proc_macro_derive(Model, attributes(orm))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Model can only be derived for structs",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Model requires named fields",
        ));
    };

    let mut embeds_base = false;
    let mut columns = Vec::new();
    for field in &named.named {
        if is_base_model(&field.ty) {
            embeds_base = true;
            continue;
        }
        let attr = OrmAttr::parse(&field.attrs)?;
        if attr.skip {
            continue;
        }
        let name = match (attr.column, &field.ident) {
            (Some(column), _) => column,
            (None, Some(ident)) => ident.unraw().to_string(),
            (None, None) => continue,
        };
        columns.push(name);
    }

    let ident = &input.ident;
    let model_name = ident.unraw().to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let base = if embeds_base {
        quote! { columns.extend_from_slice(::bourbon_core::models::BaseModel::COLUMNS); }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl #impl_generics ::bourbon_core::models::Model for #ident #ty_generics #where_clause {
            const NAME: &'static str = #model_name;

            fn columns() -> ::std::vec::Vec<&'static str> {
                let mut columns: ::std::vec::Vec<&'static str> = ::std::vec::Vec::new();
                #base
                columns.extend_from_slice(&[#(#columns),*]);
                columns
            }
        }
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

#[derive(Default)]
struct OrmAttr {
    skip: bool,
    column: Option<String>,
}

impl OrmAttr {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
            attr.parse_nested_meta(|meta| {
                let value = if meta.input.peek(syn::Token![=]) {
                    Some(meta.value()?.parse::<Lit>()?)
                } else {
                    None
                };
                if meta.path.is_ident("skip") {
                    out.skip = true;
                } else if meta.path.is_ident("column") {
                    match value {
                        Some(Lit::Str(s)) => out.column = Some(s.value()),
                        _ => return Err(meta.error("expected `column = \"name\"`")),
                    }
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}
