//! `#[derive(ProjectionName)]`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, LitStr};

const STRIPPED_SUFFIXES: [&str; 3] = ["Projection", "Projector", "Runner"];

/// Converts a PascalCase or camelCase identifier to kebab-case, keeping acronyms together:
/// `AddressList` -> `address-list`, `CRABImport` -> `crab-import`.
fn to_kebab_case(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len() + 4);

    for (i, c) in chars.iter().copied().enumerate() {
        if c.is_uppercase() {
            let boundary = i > 0 && {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            };
            if boundary {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

fn default_name(ident: &str) -> String {
    let stripped = STRIPPED_SUFFIXES
        .iter()
        .find_map(|suffix| ident.strip_suffix(suffix).filter(|rest| !rest.is_empty()))
        .unwrap_or(ident);
    to_kebab_case(stripped)
}

/// Reads `#[projection_name("x")]` or `#[projection_name(name = "x")]`.
fn custom_name(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut name = None;

    for attr in input
        .attrs
        .iter()
        .filter(|attr| attr.path().is_ident("projection_name"))
    {
        if let Ok(lit) = attr.parse_args::<LitStr>() {
            name = Some(lit.value());
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected a string literal or `name = \"...\"`"))
            }
        })?;
    }

    if let Some(value) = &name {
        if value.trim().is_empty() {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "projection name must not be empty",
            ));
        }
    }

    Ok(name)
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    if matches!(input.data, Data::Union(_)) {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "ProjectionName cannot be derived for unions",
        ));
    }

    let ident = &input.ident;
    let name = match custom_name(&input)? {
        Some(name) => name,
        None => default_name(&ident.to_string()),
    };
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::projector_core::NamedProjection for #ident #type_generics #where_clause {
            fn projection_name(&self) -> &str {
                #name
            }
        }
    })
}

pub fn projection_name_impl(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    match syn::parse::<DeriveInput>(item).and_then(expand) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_words() {
        assert_eq!(to_kebab_case("AddressList"), "address-list");
        assert_eq!(to_kebab_case("Parcel"), "parcel");
        assert_eq!(to_kebab_case("parcel"), "parcel");
    }

    #[test]
    fn kebab_case_acronyms() {
        assert_eq!(to_kebab_case("CRABImport"), "crab-import");
        assert_eq!(to_kebab_case("WFSAddress"), "wfs-address");
        assert_eq!(to_kebab_case("SQL"), "sql");
        assert_eq!(to_kebab_case("loadCSVFile"), "load-csv-file");
    }

    #[test]
    fn kebab_case_digits() {
        assert_eq!(to_kebab_case("AddressV2"), "address-v2");
        assert_eq!(to_kebab_case("Level2Cache"), "level2-cache");
    }

    #[test]
    fn default_name_strips_one_suffix() {
        assert_eq!(default_name("AddressListProjection"), "address-list");
        assert_eq!(default_name("StreetNameProjector"), "street-name");
        assert_eq!(default_name("BackOfficeRunner"), "back-office");
        assert_eq!(default_name("ProjectionRunner"), "projection");
    }

    #[test]
    fn bare_suffix_is_kept() {
        assert_eq!(default_name("Projection"), "projection");
        assert_eq!(default_name("Runner"), "runner");
    }

    #[test]
    fn attribute_overrides_the_type_name() {
        let input: DeriveInput = syn::parse_quote! {
            #[projection_name("parcels-v2")]
            struct ParcelProjection;
        };
        assert_eq!(custom_name(&input).unwrap().as_deref(), Some("parcels-v2"));

        let input: DeriveInput = syn::parse_quote! {
            #[projection_name(name = "streets")]
            struct StreetProjection;
        };
        assert_eq!(custom_name(&input).unwrap().as_deref(), Some("streets"));
    }

    #[test]
    fn unknown_attribute_key_is_rejected() {
        let input: DeriveInput = syn::parse_quote! {
            #[projection_name(prefix = "x")]
            struct StreetProjection;
        };
        assert!(custom_name(&input).is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        let input: DeriveInput = syn::parse_quote! {
            #[projection_name("")]
            struct StreetProjection;
        };
        assert!(custom_name(&input).is_err());
    }
}
