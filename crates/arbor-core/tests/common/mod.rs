//! Bookstore fixtures shared by the integration tests
#![allow(dead_code)]

use arbor_core::{Instance, Model, ModelBuilder, Result, Tree, TypeNamespace, Value};
use serde_json::json;

/// Compiled bookstore models, all registered in one namespace
pub struct Bookstore {
    pub types: TypeNamespace,
    pub book: Model,
    pub store: Model,
    pub entry: Model,
    pub cart: Model,
    pub shop: Model,
}

fn available_names(store: &Instance) -> Result<Value> {
    let mut names = Vec::new();
    for book in store.map("books")?.instances()? {
        if book.boolean("is_available")? {
            names.push(book.string("name")?);
        }
    }
    names.sort();
    Ok(Value::from(names))
}

fn total_price(cart: &Instance) -> Result<Value> {
    let mut total = 0.0;
    for entry in cart.list("entries")?.instances()? {
        total += entry.view("price")?.try_number()?;
    }
    Ok(Value::Number(total))
}

pub fn bookstore() -> Bookstore {
    let types = TypeNamespace::new();

    let book = ModelBuilder::new("Book")
        .field("id", |t| t.identifier())
        .unwrap()
        .field("name", |t| t.string())
        .unwrap()
        .field("author", |t| t.string())
        .unwrap()
        .field("price", |t| t.number())
        .unwrap()
        .field_default("is_available", |t| t.boolean(), json!(true))
        .unwrap()
        .compile(&types)
        .unwrap();

    let store = ModelBuilder::new("BookStore")
        .field_default("is_loading", |t| t.boolean(), json!(true))
        .unwrap()
        .field_default("books", |t| t.map(t.named("Book")), json!({}))
        .unwrap()
        .view("available_book_names", available_names)
        .unwrap()
        .mutation("update_books", |this, args| {
            let books = this.map("books")?;
            for item in args.first().and_then(Value::as_list).unwrap_or(&[]) {
                books.put(item.clone())?;
            }
            this.set("is_loading", false)?;
            Ok(Value::Null)
        })
        .unwrap()
        .compile(&types)
        .unwrap();

    let entry = ModelBuilder::new("CartEntry")
        .field_default("quantity", |t| t.number(), json!(0))
        .unwrap()
        .field("book", |t| t.reference(t.named("Book")))
        .unwrap()
        .typed_view("price", |t| t.number(), |this| {
            let book = this.child("book")?;
            Ok(Value::Number(book.number("price")? * this.number("quantity")?))
        })
        .unwrap()
        .view("is_valid_book", |this| {
            Ok(Value::Bool(this.child("book")?.boolean("is_available")?))
        })
        .unwrap()
        .mutation("increase_quantity", |this, args| {
            let by = args.first().map(Value::try_number).transpose()?.unwrap_or(1.0);
            let next = this.number("quantity")? + by;
            this.set("quantity", next)?;
            Ok(Value::Null)
        })
        .unwrap()
        .mutation("set_quantity", |this, args| {
            this.set("quantity", args[0].clone())?;
            Ok(Value::Null)
        })
        .unwrap()
        .compile(&types)
        .unwrap();

    let cart = ModelBuilder::new("Cart")
        .field_default("entries", |t| t.array(t.named("CartEntry")), json!([]))
        .unwrap()
        .typed_view("total_price", |t| t.number(), total_price)
        .unwrap()
        .view("can_checkout", |this| {
            let has_entries = !this.list("entries")?.is_empty()?;
            Ok(Value::Bool(has_entries && this.view("total_price")?.try_number()? > 0.0))
        })
        .unwrap()
        .mutation("add_book", |this, args| {
            let book = args[0].clone();
            let entries = this.list("entries")?;
            for entry in entries.instances()? {
                if entry.raw("book")? == book {
                    return entry.call("increase_quantity", &[Value::from(1)]);
                }
            }
            entries.push(json!({"book": book.to_json()?, "quantity": 1}))?;
            Ok(Value::Null)
        })
        .unwrap()
        .mutation("clear", |this, _| {
            this.list("entries")?.clear()?;
            Ok(Value::Null)
        })
        .unwrap()
        .compile(&types)
        .unwrap();

    let shop = ModelBuilder::new("Shop")
        .field_default("store", |t| t.named("BookStore"), json!({}))
        .unwrap()
        .field_default("cart", |t| t.named("Cart"), json!({}))
        .unwrap()
        .compile(&types)
        .unwrap();

    Bookstore {
        types,
        book,
        store,
        entry,
        cart,
        shop,
    }
}

/// Two books: "Dune" (10, available) and "Emma" (25, sold out)
pub fn shop_snapshot() -> serde_json::Value {
    json!({
        "store": {
            "is_loading": false,
            "books": {
                "b1": {"id": "b1", "name": "Dune", "author": "Herbert", "price": 10},
                "b2": {"id": "b2", "name": "Emma", "author": "Austen", "price": 25, "is_available": false}
            }
        },
        "cart": {"entries": []}
    })
}

pub fn create_shop(fixtures: &Bookstore, tree: &Tree) -> Instance {
    fixtures
        .shop
        .create(tree, shop_snapshot())
        .expect("shop snapshot should materialize")
}
