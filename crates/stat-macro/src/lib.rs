// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use proc_macro::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::DeriveInput;
use syn::Field;
use syn::FieldsNamed;
use syn::Ident;
use syn::parse_macro_input;

/// Generate a [`fpspin::ddi::stat::StatProvider`] implementation
/// given a struct of named fields of type
/// [`fpspin::ddi::stat::StatU64`].
///
/// ```Rust
/// #[derive(StatProvider)]
/// struct AllocStats {
///     allocs: StatU64,
///     frees: StatU64,
/// }
/// ```
///
/// This generates an `AllocStatsSnap` struct holding plain `u64`
/// copies of each counter, and the following impl.
///
/// ```Rust
/// impl StatProvider for AllocStats {
///     const NUM_FIELDS: u32 = 2;
///     const NAMES: &'static [&'static str] = &["allocs", "frees"];
///     type Snap = AllocStatsSnap;
///
///     fn new() -> Self {
///         Self { allocs: StatU64::new(), frees: StatU64::new() }
///     }
///
///     fn snapshot(&self) -> Self::Snap {
///         AllocStatsSnap {
///             allocs: self.allocs.val(),
///             frees: self.frees.val(),
///         }
///     }
/// }
/// ```
#[proc_macro_derive(StatProvider)]
pub fn derive_stat_provider(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, vis, .. } = parse_macro_input!(input);
    let fields: Vec<Field> = match data {
        syn::Data::Struct(s) => match s.fields {
            syn::Fields::Named(FieldsNamed { named, .. }) => {
                named.into_iter().collect()
            }

            syn::Fields::Unnamed(_) => {
                panic!("A StatProvider cannot have unnamed fields");
            }

            syn::Fields::Unit => {
                panic!("A unit struct cannot be a StatProvider");
            }
        },

        _ => panic!("Only a struct may be a StatProvider"),
    };

    let num_fields = fields.len() as u32;
    let num_fields_usize = fields.len();
    let fields_ident: Vec<Ident> =
        fields.iter().filter_map(|f| f.ident.clone()).collect();
    let ident_snap = format_ident!("{}Snap", ident);

    let output = quote! {
        #[derive(
            Clone, Copy, Debug, Default, Eq, PartialEq, ::serde::Serialize,
        )]
        #vis struct #ident_snap {
            #( pub #fields_ident: u64, )*
        }

        impl #ident_snap {
            /// Counter name and value pairs, in declaration order.
            pub fn pairs(&self) -> [(&'static str, u64); #num_fields_usize] {
                [ #( (stringify!(#fields_ident), self.#fields_ident), )* ]
            }
        }

        impl ::fpspin::ddi::stat::StatProvider for #ident {
            const NUM_FIELDS: u32 = #num_fields;
            const NAMES: &'static [&'static str] =
                &[ #( stringify!(#fields_ident), )* ];
            type Snap = #ident_snap;

            fn new() -> Self {
                use ::fpspin::ddi::stat::StatU64;

                Self {
                    #( #fields_ident: StatU64::new(), )*
                }
            }

            fn snapshot(&self) -> Self::Snap {
                #ident_snap {
                    #( #fields_ident: self.#fields_ident.val(), )*
                }
            }
        }
    };

    output.into()
}
