//! Bookstore Demonstration
//!
//! Builds the bookstore models, loads a catalogue through a flow, and fills
//! a cart, printing snapshots along the way.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use arbor_core::logging_facility::{init, Profile};
use arbor_core::{ArborConfig, Environment, ModelBuilder, Tree, TypeNamespace, Value};
use futures::executor::block_on;
use futures::FutureExt;
use serde_json::json;

const CONFIG: &str = r#"
logging = "development"

[tree]
protected = true
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ArborConfig::from_toml_str(CONFIG)?;
    init(config.logging);

    println!("=== Arbor Bookstore Demo ===\n");

    // ===== Part 1: Declaring models =====
    println!("## Part 1: Models\n");

    let types = TypeNamespace::new();

    let book = ModelBuilder::new("Book")
        .field("id", |t| t.identifier())?
        .field("name", |t| t.string())?
        .field("price", |t| t.number())?
        .field_default("is_available", |t| t.boolean(), json!(true))?
        .compile(&types)?;
    println!("{}", book.describe());

    let entry = ModelBuilder::new("CartEntry")
        .field_default("quantity", |t| t.number(), json!(0))?
        .field("book", |t| t.reference(t.named("Book")))?
        .typed_view("price", |t| t.number(), |this| {
            let book = this.child("book")?;
            Ok(Value::Number(book.number("price")? * this.number("quantity")?))
        })?
        .mutation("increase_quantity", |this, args| {
            let by = args.first().map(Value::try_number).transpose()?.unwrap_or(1.0);
            this.set("quantity", this.number("quantity")? + by)?;
            Ok(Value::Null)
        })?
        .compile(&types)?;
    println!("{}", entry.describe());

    let shop = ModelBuilder::new("Shop")
        .field_default("books", |t| t.map(t.named("Book")), json!({}))?
        .field_default("entries", |t| t.array(t.named("CartEntry")), json!([]))?
        .view("total", |this| {
            let mut total = 0.0;
            for entry in this.list("entries")?.instances()? {
                total += entry.view("price")?.try_number()?;
            }
            Ok(Value::Number(total))
        })?
        .mutation("add_book", |this, args| {
            let id = args[0].clone();
            let entries = this.list("entries")?;
            for entry in entries.instances()? {
                if entry.raw("book")? == id {
                    return entry.call("increase_quantity", &[Value::from(1)]);
                }
            }
            entries.push(json!({"book": id.to_json()?, "quantity": 1}))?;
            Ok(Value::Null)
        })?
        .flow("load_books", |ctx, _args| {
            async move {
                let catalogue = ctx.env()?.get::<serde_json::Value>("catalogue")?;
                ctx.step(|this| {
                    let books = this.map("books")?;
                    for book in catalogue.as_array().into_iter().flatten() {
                        books.put(book.clone())?;
                    }
                    Ok(())
                })?;
                Ok(Value::Null)
            }
            .boxed_local()
        })?
        .compile(&types)?;
    println!("{}\n", shop.describe());

    // ===== Part 2: Loading the catalogue =====
    println!("## Part 2: Flow\n");

    let tree = Tree::with_options(config.tree);
    let env = Environment::new().with_service(
        "catalogue",
        json!([
            {"id": "b1", "name": "Dune", "price": 10},
            {"id": "b2", "name": "Emma", "price": 25}
        ]),
    );
    let instance = shop.create_with_env(&tree, json!({}), env)?;
    instance.on_snapshot(|snapshot| println!("  snapshot: {}", snapshot))?;

    block_on(instance.flow("load_books", Vec::new())?)?;
    println!("books loaded: {}\n", instance.map("books")?.len()?);

    // ===== Part 3: Filling the cart =====
    println!("## Part 3: Cart\n");

    instance.call("add_book", &[Value::from("b1")])?;
    instance.call("add_book", &[Value::from("b1")])?;
    instance.call("add_book", &[Value::from("b2")])?;
    println!("total: {}", instance.view("total")?);

    // Writes outside an action are rejected on a protected tree
    let err = instance.set("entries", json!([])).unwrap_err();
    println!("direct write: {}", err);

    println!("\n=== Demo Complete ===");
    Ok(())
}
