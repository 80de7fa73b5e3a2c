use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_quote, Block, ImplItem, ImplItemFn, ItemFn, ItemImpl, LitStr, Type};

/// Opens a profiler span for the whole body of a function.
///
/// Can be put on free functions, methods and impl blocks. In an impl block every method gets a
/// span named `Type::method`. An explicit name can be passed as `#[profile("name")]`.
#[proc_macro_attribute]
pub fn profile(args: TokenStream, item: TokenStream) -> TokenStream {
    let explicit_name = if args.is_empty() {
        None
    } else {
        match syn::parse::<LitStr>(args) {
            Ok(name) => Some(name.value()),
            Err(err) => return err.to_compile_error().into(),
        }
    };

    if let Ok(item_impl) = syn::parse::<ItemImpl>(item.clone()) {
        return profile_impl(item_impl);
    }

    if let Ok(mut impl_item_fn) = syn::parse::<ImplItemFn>(item.clone()) {
        let name = explicit_name.unwrap_or_else(|| impl_item_fn.sig.ident.to_string());
        impl_item_fn.block = instrument(&impl_item_fn.block, &name);
        return TokenStream::from(quote! { #impl_item_fn });
    }

    if let Ok(mut item_fn) = syn::parse::<ItemFn>(item) {
        let name = explicit_name.unwrap_or_else(|| item_fn.sig.ident.to_string());
        item_fn.block = Box::new(instrument(&item_fn.block, &name));
        return TokenStream::from(quote! { #item_fn });
    }

    syn::Error::new(Span::call_site(), "profile must be used on a function, a method or an impl block")
        .to_compile_error()
        .into()
}

fn instrument(block: &Block, name: &str) -> Block {
    parse_quote! {{
        let _span = kairos_shared::span!(#name);
        #block
    }}
}

fn profile_impl(mut item_impl: ItemImpl) -> TokenStream {
    let type_name = match item_impl.self_ty.as_ref() {
        Type::Path(type_path) => type_path.path.segments.last().map(|segment| segment.ident.to_string()),
        _ => None,
    };
    for item in &mut item_impl.items {
        if let ImplItem::Fn(item_fn) = item {
            let fn_name = item_fn.sig.ident.to_string();
            let name = match &type_name {
                Some(type_name) => format!("{type_name}::{fn_name}"),
                None => fn_name,
            };
            item_fn.block = instrument(&item_fn.block, &name);
        }
    }
    TokenStream::from(quote! { #item_impl })
}
