use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, Result, Type, parse_macro_input};

/// Derive macro that generates a `Default` implementation and a field
/// validator for configuration structs with inline default values.
///
/// String fields accept string literals and are converted with `.into()`.
/// All other types use the default expression as-is.
///
/// Besides `#[default(...)]`, every field may carry one validation marker:
///
/// - `#[positive]`: the value must compare greater than the type's
///   `Default` (zero for numbers). NaN is rejected.
/// - `#[non_negative]`: the value must compare greater than or equal to the
///   type's `Default`. NaN is rejected.
/// - `#[nested]`: the field's type also derives `ConfigDefaults`; its
///   invalid fields are reported with a `field.` prefix.
///
/// The generated `invalid_fields()` method returns the dotted names of every
/// field that fails its marker, in declaration order.
///
/// # Example
/// ```
/// use iontrap_macros::ConfigDefaults;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(ConfigDefaults, Serialize, Deserialize)]
/// #[serde(default)]
/// pub struct IntegrationConfig {
///     #[default(1.0e-9)]
///     #[positive]
///     pub dt: f64,
///
///     #[default(10)]
///     #[positive]
///     pub steps_per_tick: usize,
///
///     #[default(None)]
///     pub seed: Option<u64>,
///
///     #[default("run")]
///     pub label: String,
/// }
///
/// let mut config = IntegrationConfig::default();
/// assert_eq!(config.dt, 1.0e-9);
/// assert_eq!(config.steps_per_tick, 10);
/// assert_eq!(config.seed, None);
/// assert_eq!(config.label, "run");
/// assert!(config.invalid_fields().is_empty());
///
/// config.dt = -1.0;
/// assert_eq!(config.invalid_fields(), vec!["dt".to_string()]);
/// ```
///
/// # Errors
///
/// The macro produces a compile error if:
/// - Applied to anything other than a struct with named fields
/// - Any field is missing a `#[default(...)]` attribute
/// - A default or marker attribute is malformed
/// - A field carries more than one validation marker
#[proc_macro_derive(ConfigDefaults, attributes(default, positive, non_negative, nested))]
pub fn config_defaults(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_impls(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Validation rule attached to a single field
enum Check {
    None,
    Positive,
    NonNegative,
    Nested,
}

fn generate_impls(input: DeriveInput) -> Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unnamed(_) => {
                return Err(Error::new_spanned(
                    &input,
                    "ConfigDefaults only supports structs with named fields",
                ));
            }
            Fields::Unit => {
                return Err(Error::new_spanned(
                    &input,
                    "ConfigDefaults cannot be derived for unit structs",
                ));
            }
        },
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                &input,
                "ConfigDefaults can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                &input,
                "ConfigDefaults can only be derived for structs, not unions",
            ));
        }
    };

    let mut field_defaults = Vec::with_capacity(fields.len());
    let mut field_checks = Vec::new();

    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            return Err(Error::new_spanned(field, "expected a named field"));
        };
        let field_type = &field.ty;
        let default_value = extract_default_value(field)?;

        if is_string_type(field_type) {
            field_defaults.push(quote! { #field_name: ::std::convert::Into::into(#default_value) });
        } else {
            field_defaults.push(quote! { #field_name: #default_value });
        }

        let label = field_name.to_string();
        match extract_check(field)? {
            Check::None => {}
            Check::Positive => field_checks.push(quote! {
                if !(self.#field_name > <#field_type as ::core::default::Default>::default()) {
                    invalid.push(::std::string::String::from(#label));
                }
            }),
            Check::NonNegative => field_checks.push(quote! {
                if !(self.#field_name >= <#field_type as ::core::default::Default>::default()) {
                    invalid.push(::std::string::String::from(#label));
                }
            }),
            Check::Nested => field_checks.push(quote! {
                for inner in self.#field_name.invalid_fields() {
                    invalid.push(::std::format!("{}.{}", #label, inner));
                }
            }),
        }
    }

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::core::default::Default for #name #ty_generics #where_clause {
            fn default() -> Self {
                Self {
                    #(#field_defaults),*
                }
            }
        }

        #[automatically_derived]
        impl #impl_generics #name #ty_generics #where_clause {
            /// Names of fields whose values violate their validation markers.
            #[allow(clippy::neg_cmp_op_on_partial_ord)]
            pub fn invalid_fields(&self) -> ::std::vec::Vec<::std::string::String> {
                #[allow(unused_mut)]
                let mut invalid = ::std::vec::Vec::new();
                #(#field_checks)*
                invalid
            }
        }
    })
}

/// Check if the type is String
fn is_string_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "String";
        }
    }
    false
}

fn field_label(field: &syn::Field) -> String {
    field
        .ident
        .as_ref()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "unnamed field".to_string())
}

/// Extract the default value from a field's #[default(...)] attribute
fn extract_default_value(field: &syn::Field) -> Result<proc_macro2::TokenStream> {
    let field_name = field_label(field);

    for attr in &field.attrs {
        if attr.path().is_ident("default") {
            let tokens: proc_macro2::TokenStream = attr.parse_args().map_err(|e| {
                Error::new_spanned(
                    attr,
                    format!(
                        "Failed to parse default attribute for field '{}': {}",
                        field_name, e
                    ),
                )
            })?;

            if tokens.is_empty() {
                return Err(Error::new_spanned(
                    attr,
                    format!(
                        "Field '{}' has an empty #[default()] attribute. Please provide a default value.",
                        field_name
                    ),
                ));
            }

            return Ok(tokens);
        }
    }

    Err(Error::new_spanned(
        field,
        format!(
            "Field '{}' must have a #[default(...)] attribute specifying its default value",
            field_name
        ),
    ))
}

/// Extract the validation marker, if any, from a field's attributes
fn extract_check(field: &syn::Field) -> Result<Check> {
    let mut check = Check::None;

    for attr in &field.attrs {
        let found = if attr.path().is_ident("positive") {
            Check::Positive
        } else if attr.path().is_ident("non_negative") {
            Check::NonNegative
        } else if attr.path().is_ident("nested") {
            Check::Nested
        } else {
            continue;
        };

        attr.meta.require_path_only()?;

        if !matches!(check, Check::None) {
            return Err(Error::new_spanned(
                attr,
                format!(
                    "Field '{}' may carry only one of #[positive], #[non_negative] or #[nested]",
                    field_label(field)
                ),
            ));
        }
        check = found;
    }

    Ok(check)
}
