// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Attribute macro behind `test_with_tracing::test`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse_macro_input;
use syn::parse_quote;
use syn::ItemFn;

/// Marks a function as a test and initializes `tracing` before its body runs.
///
/// Accepts the same functions as the built-in `#[test]`, including ones that
/// return a `Result`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = TokenStream2::from(attr);
        return quote! {
            compile_error!(concat!("unexpected arguments: ", stringify!(#attr)));
        }
        .into();
    }

    let mut func = parse_macro_input!(item as ItemFn);
    let body = &func.block;
    func.block = parse_quote!({
        ::test_with_tracing::init();
        #body
    });

    quote! {
        #[::core::prelude::v1::test]
        #func
    }
    .into()
}
