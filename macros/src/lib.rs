//! Procedural macros for the wiretap test harness.
//!
//! - `#[derive(Message)]`: Implements `wiretap::Message` for your type, preserving generics
//!   and bounds. The type tag defaults to the type's identifier and can be pinned with
//!   `#[message(tag = "...")]`.
//!
//! Usage:
//! ```rust,ignore
//! use wiretap::Message;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize, Message)]
//! struct OrderCreated { id: u64 }
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize, Message)]
//! #[message(tag = "billing.InvoiceIssued")]
//! struct InvoiceIssued { number: String }
//! ```
use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

#[proc_macro_derive(Message, attributes(message))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = input.ident.clone();
    let generics = input.generics.clone();

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut tag = ident.to_string();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("message")) {
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("tag") {
                let lit: LitStr = meta.value()?.parse()?;
                tag = lit.value();
                Ok(())
            } else {
                Err(meta.error("unsupported message attribute, expected `tag = \"...\"`"))
            }
        });
        if let Err(err) = parsed {
            return err.to_compile_error().into();
        }
    }

    let expanded = quote! {
        impl #impl_generics wiretap::Message for #ident #ty_generics #where_clause {
            fn type_tag() -> wiretap::TypeTag {
                wiretap::TypeTag::from_static(#tag)
            }
        }
    };
    TokenStream::from(expanded)
}
