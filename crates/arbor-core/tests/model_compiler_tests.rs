#![allow(clippy::unwrap_used, clippy::expect_used)]

/// Model compiler: declarations, compile-time checks, two-phase creation,
/// lifecycle hooks and snapshot validation
mod common;

use std::cell::RefCell;
use std::rc::Rc;

use arbor_core::{ArborError, FieldSpec, Model, ModelBuilder, Tree, TypeNamespace, Value};
use proptest::prelude::*;
use serde_json::json;

type Journal = Rc<RefCell<Vec<String>>>;

fn journaled(name: &str, journal: &Journal) -> ModelBuilder {
    let mut builder = ModelBuilder::new(name);
    for hook in ["after_create", "after_attach", "before_detach", "before_destroy"] {
        let journal = journal.clone();
        builder = builder
            .mutation(hook, move |this, _| {
                journal
                    .borrow_mut()
                    .push(format!("{} {}", hook, this.model()?.name()));
                Ok(Value::Null)
            })
            .unwrap();
    }
    builder
}

#[test]
fn test_untyped_field_fails_at_declaration() {
    // GIVEN a field spec without a type resolver
    let spec = FieldSpec::new("title");

    // WHEN it is declared
    let result = ModelBuilder::new("Book").declare(spec);

    // THEN the declaration itself fails
    match result {
        Err(ArborError::Configuration { model, reason }) => {
            assert_eq!(model, "Book");
            assert!(reason.contains("untyped fields are not supported"));
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("declaration should fail"),
    }
}

#[test]
fn test_nullable_and_default_fields_in_snapshots() {
    // GIVEN a model with a nullable field and a defaulted field
    let types = TypeNamespace::new();
    let model = ModelBuilder::new("Profile")
        .nullable("nickname", |t| t.string())
        .unwrap()
        .field_default("visits", |t| t.number(), json!(0))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN both are omitted, or the nullable one is set to null
    let omitted = model.create(&tree, json!({})).unwrap();
    let explicit = model.create(&tree, json!({"nickname": null, "visits": 4})).unwrap();

    // THEN absence snapshots as null and the default respectively
    assert_eq!(omitted.snapshot().unwrap(), json!({"nickname": null, "visits": 0}));
    assert_eq!(explicit.snapshot().unwrap(), json!({"nickname": null, "visits": 4}));
    assert!(model.ty().is_valid_snapshot(&json!({"nickname": "kit"})));
    assert!(!model.ty().is_valid_snapshot(&json!({"visits": null})));
}

#[test]
fn test_unknown_snapshot_keys_are_ignored() {
    // GIVEN the bookstore models
    let fixtures = common::bookstore();
    let tree = Tree::new();

    // WHEN a book snapshot carries an extra key
    let book = fixtures
        .book
        .create(
            &tree,
            json!({"id": 7, "name": "Emma", "author": "Austen", "price": 25, "isbn": "x"}),
        )
        .unwrap();

    // THEN the key is dropped and numeric identifiers are accepted
    assert_eq!(book.identifier().unwrap(), Some(Value::Number(7.0)));
    assert!(book.snapshot().unwrap().get("isbn").is_none());
}

#[test]
fn test_invalid_snapshot_reports_violations_and_creates_nothing() {
    // GIVEN the book model
    let fixtures = common::bookstore();
    let tree = Tree::new();

    // WHEN a snapshot with two bad fields is created
    let err = fixtures
        .book
        .create(&tree, json!({"id": "b1", "name": 5, "author": "x"}))
        .unwrap_err();

    // THEN every violation is reported and no node survives
    match err {
        ArborError::InvalidSnapshot {
            type_name,
            violations,
        } => {
            assert_eq!(type_name, "Book");
            assert_eq!(violations.len(), 2, "{violations:?}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(tree.node_count(), 0);

    // AND the tree stays usable
    fixtures
        .book
        .create(&tree, json!({"id": "b1", "name": "n", "author": "a", "price": 1}))
        .unwrap();
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn test_initializer_may_create_instances_reentrantly() {
    // GIVEN a model whose default initializer creates another root in the same tree
    let types = TypeNamespace::new();
    let audit = ModelBuilder::new("Audit")
        .field("note", |t| t.string())
        .unwrap()
        .compile(&types)
        .unwrap();
    let created = Rc::new(RefCell::new(Vec::new()));
    let sink = created.clone();
    let order = ModelBuilder::new("Order")
        .field("id", |t| t.identifier())
        .unwrap()
        .field_with("audit_count", |t| t.number(), move |tree| {
            let entry = audit.create(tree, json!({"note": "order opened"}))?;
            sink.borrow_mut().push(entry);
            Ok(Value::from(sink.borrow().len()))
        })
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN the outer model is created
    let first = order.create(&tree, json!({"id": "o1"})).unwrap();
    let second = order.create(&tree, json!({"id": "o2"})).unwrap();

    // THEN both constructions complete with their own nodes
    assert_eq!(first.number("audit_count").unwrap(), 1.0);
    assert_eq!(second.number("audit_count").unwrap(), 2.0);
    assert_eq!(first.model().unwrap().name(), "Order");
    assert_eq!(created.borrow()[0].string("note").unwrap(), "order opened");
    assert_eq!(tree.node_count(), 4);
    assert_ne!(first, created.borrow()[0]);
}

#[test]
fn test_hooks_fire_in_lifecycle_order() {
    // GIVEN a parent with a child field, both journaling their hooks
    let journal: Journal = Rc::default();
    let types = TypeNamespace::new();
    let leaf = journaled("Leaf", &journal)
        .field("id", |t| t.identifier())
        .unwrap()
        .compile(&types)
        .unwrap();
    let holder = journaled("Holder", &journal)
        .nullable("leaf", move |t| t.of(&leaf))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN the parent is created
    let root = holder.create(&tree, json!({"leaf": {"id": "a"}})).unwrap();

    // THEN after_create runs children first, then after_attach for the child
    assert_eq!(
        *journal.borrow(),
        vec!["after_create Leaf", "after_create Holder", "after_attach Leaf"]
    );

    // WHEN the root is destroyed
    journal.borrow_mut().clear();
    root.destroy().unwrap();

    // THEN before_destroy runs parents first
    assert_eq!(
        *journal.borrow(),
        vec!["before_destroy Holder", "before_destroy Leaf"]
    );
    assert!(matches!(root.snapshot(), Err(ArborError::NodeDestroyed { .. })));
}

#[test]
fn test_assignment_replaces_and_destroys_old_child() {
    // GIVEN a holder with one child
    let journal: Journal = Rc::default();
    let types = TypeNamespace::new();
    let leaf = journaled("Leaf", &journal)
        .field("id", |t| t.identifier())
        .unwrap()
        .compile(&types)
        .unwrap();
    let holder = ModelBuilder::new("Holder")
        .nullable("leaf", move |t| t.of(&leaf))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();
    let root = holder.create(&tree, json!({"leaf": {"id": "a"}})).unwrap();
    let old = root.child("leaf").unwrap();
    journal.borrow_mut().clear();

    // WHEN a new child snapshot is assigned inside an action
    root.dispatch("swap", |root| root.set("leaf", json!({"id": "b"})))
        .unwrap();

    // THEN the old child is destroyed and the new one created and attached
    assert!(!old.is_alive());
    assert_eq!(
        *journal.borrow(),
        vec!["before_destroy Leaf", "after_create Leaf", "after_attach Leaf"]
    );
    assert_eq!(root.snapshot().unwrap(), json!({"leaf": {"id": "b"}}));
}

/// A leaf whose teardown always fails and which counts its creations
fn brittle_leaf(types: &TypeNamespace, created: &Rc<std::cell::Cell<u32>>) -> Model {
    let created = created.clone();
    ModelBuilder::new("Brittle")
        .field("id", |t| t.identifier())
        .unwrap()
        .mutation("after_create", move |_, _| {
            created.set(created.get() + 1);
            Ok(Value::Null)
        })
        .unwrap()
        .mutation("before_destroy", |_, _| Err(ArborError::external("teardown refused")))
        .unwrap()
        .compile(types)
        .unwrap()
}

#[test]
fn test_failed_teardown_still_completes_the_replacement() {
    // GIVEN a holder whose child refuses teardown, in a field and in a map
    let created = Rc::new(std::cell::Cell::new(0));
    let types = TypeNamespace::new();
    let leaf = brittle_leaf(&types, &created);
    let keyed = leaf.clone();
    let holder = ModelBuilder::new("Holder")
        .nullable("leaf", move |t| t.of(&leaf))
        .unwrap()
        .field_default("shelf", move |t| t.map(t.of(&keyed)), json!({}))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();
    let root = holder
        .create(&tree, json!({"leaf": {"id": "a"}, "shelf": {"k": {"id": "k"}}}))
        .unwrap();
    assert_eq!(created.get(), 2);

    // WHEN the field is reassigned
    let result = root.dispatch("swap", |root| root.set("leaf", json!({"id": "b"})));

    // THEN the teardown error surfaces and the new child is fully created
    assert!(matches!(result, Err(ArborError::External { .. })));
    assert_eq!(created.get(), 3);
    assert_eq!(root.child("leaf").unwrap().string("id").unwrap(), "b");

    // WHEN the map entry is replaced
    let result = root.dispatch("restock", |root| {
        root.map("shelf")?.insert("k", json!({"id": "k"}))
    });

    // THEN the same holds for map entries
    assert!(matches!(result, Err(ArborError::External { .. })));
    assert_eq!(created.get(), 4);
    assert_eq!(
        root.snapshot().unwrap(),
        json!({"leaf": {"id": "b"}, "shelf": {"k": {"id": "k"}}})
    );
}

#[test]
fn test_identifier_is_immutable() {
    // GIVEN a book
    let fixtures = common::bookstore();
    let tree = Tree::new();
    let book = fixtures
        .book
        .create(&tree, json!({"id": "b1", "name": "n", "author": "a", "price": 1}))
        .unwrap();

    // WHEN the identifier is written or a snapshot with another id is applied
    let direct = book.dispatch("rename", |b| b.set("id", "b2"));
    let applied = book.apply_snapshot(json!({"id": "b2", "name": "n", "author": "a", "price": 1}));

    // THEN both fail and the identifier is unchanged
    assert!(matches!(direct, Err(ArborError::IdentifierImmutable { .. })));
    assert!(matches!(applied, Err(ArborError::IdentifierImmutable { .. })));
    assert_eq!(book.string("id").unwrap(), "b1");
}

#[test]
fn test_preprocessor_runs_before_validation() {
    // GIVEN a model accepting a legacy key through a pre-processor
    let types = TypeNamespace::new();
    let model = ModelBuilder::new("Legacy")
        .field("name", |t| t.string())
        .unwrap()
        .preprocess_snapshot(|mut snapshot| {
            if let Some(object) = snapshot.as_object_mut() {
                if let Some(title) = object.remove("title") {
                    object.insert("name".to_string(), title);
                }
            }
            snapshot
        })
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN created from the legacy shape
    let legacy = model.create(&tree, json!({"title": "old"})).unwrap();

    // THEN the field is filled from the renamed key
    assert_eq!(legacy.string("name").unwrap(), "old");
}

#[test]
fn test_post_process_snapshot_hook_rewrites_output() {
    // GIVEN a model whose snapshot hides a secret
    let types = TypeNamespace::new();
    let account = ModelBuilder::new("Account")
        .field("user", |t| t.string())
        .unwrap()
        .field_default("token", |t| t.string(), json!(""))
        .unwrap()
        .mutation("post_process_snapshot", |_, args| {
            let Some(Value::Json(serde_json::Value::Object(object))) = args.first() else {
                return Ok(Value::Null);
            };
            let mut object = object.clone();
            object.remove("token");
            Ok(Value::Json(serde_json::Value::Object(object)))
        })
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN the instance is snapshotted
    let acct = account
        .create(&tree, json!({"user": "ann", "token": "s3cret"}))
        .unwrap();

    // THEN the hook's replacement is returned
    assert_eq!(acct.snapshot().unwrap(), json!({"user": "ann"}));
    assert_eq!(acct.string("token").unwrap(), "s3cret");
}

#[test]
fn test_recursive_model_through_named_forward_reference() {
    // GIVEN a model whose children are of the model itself
    let types = TypeNamespace::new();
    let node = ModelBuilder::new("Folder")
        .field("name", |t| t.string())
        .unwrap()
        .field_default("children", |t| t.array(t.named("Folder")), json!([]))
        .unwrap()
        .view("depth", |this| {
            let mut deepest = 0.0_f64;
            for child in this.list("children")?.instances()? {
                deepest = deepest.max(child.view("depth")?.try_number()?);
            }
            Ok(Value::Number(deepest + 1.0))
        })
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN a nested structure is created
    let root = node
        .create(
            &tree,
            json!({"name": "/", "children": [{"name": "a", "children": [{"name": "b"}]}]}),
        )
        .unwrap();

    // THEN children are instances of the same model and paths follow the tree
    let a = root.list("children").unwrap().instances().unwrap()[0].clone();
    let b = a.list("children").unwrap().instances().unwrap()[0].clone();
    assert!(b.model().unwrap().ptr_eq(&node));
    assert_eq!(b.path().unwrap(), "/children/0/children/0");
    assert_eq!(b.parent().unwrap(), Some(a.clone()));
    assert_eq!(b.root().unwrap(), root);
    assert_eq!(root.view("depth").unwrap(), Value::Number(3.0));
}

#[test]
fn test_extended_model_is_accepted_where_parent_is_expected() {
    // GIVEN a base model, an extension and a holder typed with the base
    let types = TypeNamespace::new();
    let animal = ModelBuilder::new("Animal")
        .field("name", |t| t.string())
        .unwrap()
        .view("greeting", |this| Ok(Value::from(format!("I am {}", this.string("name")?))))
        .unwrap()
        .compile(&types)
        .unwrap();
    let dog = ModelBuilder::new("Dog")
        .extends(&animal)
        .field_default("good", |t| t.boolean(), json!(true))
        .unwrap()
        .compile(&types)
        .unwrap();
    let base = animal.clone();
    let kennel = ModelBuilder::new("Kennel")
        .nullable("resident", move |t| t.of(&base))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();

    // WHEN a dog root is adopted into the kennel
    let rex = dog.create(&tree, json!({"name": "Rex"})).unwrap();
    let home = kennel.create(&tree, json!({})).unwrap();
    home.dispatch("adopt", |home| home.set("resident", rex.id()))
        .unwrap();

    // THEN the inherited view works and the dog is now a child
    assert_eq!(rex.view("greeting").unwrap(), Value::from("I am Rex"));
    assert_eq!(rex.parent_instance(&animal).unwrap(), None);
    assert_eq!(rex.parent().unwrap(), Some(home.clone()));
    assert_eq!(
        home.snapshot().unwrap(),
        json!({"resident": {"name": "Rex", "good": true}})
    );
}

#[test]
fn test_attached_node_cannot_be_adopted_twice() {
    // GIVEN a child already attached to one holder
    let types = TypeNamespace::new();
    let item = ModelBuilder::new("Item")
        .field("n", |t| t.number())
        .unwrap()
        .compile(&types)
        .unwrap();
    let slot_item = item.clone();
    let slot = ModelBuilder::new("Slot")
        .nullable("item", move |t| t.of(&slot_item))
        .unwrap()
        .compile(&types)
        .unwrap();
    let tree = Tree::new();
    let first = slot.create(&tree, json!({"item": {"n": 1}})).unwrap();
    let second = slot.create(&tree, json!({})).unwrap();
    let child = first.child("item").unwrap();

    // WHEN the same node is assigned into another holder
    let result = second.dispatch("steal", |s| s.set("item", child.id()));

    // THEN it is rejected
    assert!(matches!(result, Err(ArborError::AlreadyAttached { .. })));
    assert_eq!(second.snapshot().unwrap(), json!({"item": null}));
}

#[test]
fn test_node_from_another_tree_is_not_adopted() {
    // GIVEN two trees, each holding an item root
    let types = TypeNamespace::new();
    let item = ModelBuilder::new("Crate")
        .field("n", |t| t.number())
        .unwrap()
        .compile(&types)
        .unwrap();
    let shelf_item = item.clone();
    let shelf = ModelBuilder::new("Shelf")
        .nullable("item", move |t| t.of(&shelf_item))
        .unwrap()
        .field_default("stack", |t| t.array(t.named("Crate")), json!([]))
        .unwrap()
        .compile(&types)
        .unwrap();
    let home_tree = Tree::new();
    let away_tree = Tree::new();
    let local = item.create(&home_tree, json!({"n": 1})).unwrap();
    let foreign = item.create(&away_tree, json!({"n": 2})).unwrap();
    let holder = shelf.create(&home_tree, json!({})).unwrap();

    // WHEN the foreign handle is assigned or pushed
    let assigned = holder.dispatch("take", |s| s.set("item", foreign.id()));
    let pushed = holder.dispatch("stack", |s| s.list("stack")?.push(foreign.id()));

    // THEN both are rejected and neither tree changes
    assert!(matches!(assigned, Err(ArborError::NodeNotFound { .. })));
    assert!(matches!(pushed, Err(ArborError::NodeNotFound { .. })));
    assert_ne!(local.id(), foreign.id());
    assert_eq!(holder.snapshot().unwrap(), json!({"item": null, "stack": []}));
    assert_eq!(foreign.parent().unwrap(), None);
    assert_eq!(foreign.number("n").unwrap(), 2.0);
}

#[test]
fn test_composed_type_merges_fields() {
    // GIVEN two model types composed in the namespace
    let types = TypeNamespace::new();
    let named = types.model("Named", vec![("name", types.string())]).unwrap();
    let priced = types.model("Priced", vec![("price", types.number())]).unwrap();

    // WHEN composed
    let both = types.compose(&named, &priced).unwrap();

    // THEN the union validates snapshots with both fields
    assert_eq!(both.describe(), "Named_Priced { name: string; price: number }");
    assert!(both.is_valid_snapshot(&json!({"name": "x", "price": 1})));
    assert!(!both.is_valid_snapshot(&json!({"name": "x"})));
}

fn simple_book() -> Model {
    common::bookstore().book
}

proptest! {
    #[test]
    fn prop_identical_initial_values_give_equal_snapshots(
        id in "[a-z]{1,6}",
        name in "[A-Za-z ]{0,12}",
        price in 0u32..10_000,
        available in any::<bool>(),
    ) {
        let book = simple_book();
        let tree = Tree::new();
        let input = json!({
            "id": id, "name": name, "author": "anon", "price": price, "is_available": available
        });

        let a = book.create(&tree, input.clone()).unwrap();
        let b = book.create(&tree, input.clone()).unwrap();

        prop_assert_ne!(a.id(), b.id());
        prop_assert_eq!(a.snapshot().unwrap(), b.snapshot().unwrap());
        prop_assert_eq!(a.snapshot().unwrap(), input);
    }
}
