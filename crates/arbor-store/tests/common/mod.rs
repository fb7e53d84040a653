//! Shop fixtures for persistence tests
#![allow(dead_code)]

use arbor_core::{Instance, Model, ModelBuilder, Tree, TypeNamespace, Value};
use serde_json::json;

pub struct Shop {
    pub types: TypeNamespace,
    pub book: Model,
    pub entry: Model,
    pub cart: Model,
    pub shop: Model,
}

pub fn shop_models() -> Shop {
    let types = TypeNamespace::new();

    let book = ModelBuilder::new("Book")
        .field("id", |t| t.identifier())
        .unwrap()
        .field("name", |t| t.string())
        .unwrap()
        .field("price", |t| t.number())
        .unwrap()
        .compile(&types)
        .unwrap();

    let entry = ModelBuilder::new("CartEntry")
        .field_default("quantity", |t| t.number(), json!(0))
        .unwrap()
        .field("book", |t| t.reference(t.named("Book")))
        .unwrap()
        .compile(&types)
        .unwrap();

    let cart = ModelBuilder::new("Cart")
        .field_default("entries", |t| t.array(t.named("CartEntry")), json!([]))
        .unwrap()
        .view("total_price", |this| {
            let mut total = 0.0;
            for entry in this.list("entries")?.instances()? {
                total += entry.child("book")?.number("price")? * entry.number("quantity")?;
            }
            Ok(Value::Number(total))
        })
        .unwrap()
        .mutation("add_book", |this, args| {
            let book = args[0].clone();
            let entries = this.list("entries")?;
            for entry in entries.instances()? {
                if entry.raw("book")? == book {
                    let next = entry.number("quantity")? + 1.0;
                    entry.set("quantity", next)?;
                    return Ok(Value::Null);
                }
            }
            entries.push(json!({"book": book.to_json()?, "quantity": 1}))?;
            Ok(Value::Null)
        })
        .unwrap()
        .compile(&types)
        .unwrap();

    let shop = ModelBuilder::new("Shop")
        .field_default("books", |t| t.map(t.named("Book")), json!({}))
        .unwrap()
        .field_default("cart", |t| t.named("Cart"), json!({}))
        .unwrap()
        .compile(&types)
        .unwrap();

    Shop {
        types,
        book,
        entry,
        cart,
        shop,
    }
}

/// Books "b1" (10) and "b2" (25), empty cart
pub fn stocked() -> serde_json::Value {
    json!({
        "books": {
            "b1": {"id": "b1", "name": "Dune", "price": 10},
            "b2": {"id": "b2", "name": "Emma", "price": 25}
        },
        "cart": {"entries": []}
    })
}

pub fn open_shop(models: &Shop, tree: &Tree) -> Instance {
    models
        .shop
        .create(tree, stocked())
        .expect("stocked shop should materialize")
}
