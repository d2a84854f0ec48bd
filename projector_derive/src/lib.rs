mod name;

/// Derive macro implementing `projector_core::NamedProjection`.
///
/// The projection name is the type name with a trailing `Projection`, `Projector` or `Runner`
/// removed, converted to kebab-case. It is the key positions are stored under, so renaming the
/// type renames the projection unless the name is pinned with the attribute.
///
/// ```ignore
/// use projector_derive::ProjectionName;
///
/// #[derive(ProjectionName)]
/// struct ParcelRegistryProjection;
///
/// // projection_name() -> "parcel-registry"
///
/// #[derive(ProjectionName)]
/// #[projection_name("parcels-v2")]
/// struct ParcelProjection;
///
/// #[derive(ProjectionName)]
/// #[projection_name(name = "streets")]
/// struct StreetNameProjector;
/// ```
#[proc_macro_derive(ProjectionName, attributes(projection_name))]
pub fn projection_name(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    name::projection_name_impl(item)
}
