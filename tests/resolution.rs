mod common;

use common::{class, interface, name, TestVm, OBJECT};
use jvm_loader::{
    classfile::{AccessFlags, PrimitiveKind},
    layout::OBJECT_HEADER_SIZE,
    Error, HiddenField, TypeState,
};
use std::sync::Arc;

fn hierarchy() -> TestVm {
    let mut a = class("A", OBJECT);
    a.field(AccessFlags::PRIVATE, "a", "J")
        .method(AccessFlags::PUBLIC, "foo", "()V")
        .method(AccessFlags::PUBLIC, "bar", "()V")
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "make", "()LA;")
        .method(AccessFlags::PRIVATE, "secret", "()V");
    let mut b = class("B", "A");
    b.field(AccessFlags::PRIVATE, "b", "I")
        .field(AccessFlags::STATIC, "count", "I")
        .method(AccessFlags::PUBLIC, "foo", "()V")
        .method(AccessFlags::PUBLIC, "baz", "()V");
    TestVm::new().class("A", a.build()).class("B", b.build())
}

#[test]
fn subclass_layouts_extend_their_parent() {
    let vm = hierarchy().build();
    let a = vm.load("A", true).unwrap();
    let b = vm.load("B", true).unwrap();

    let a_layout = a.as_class().unwrap().instance_layout().unwrap();
    let b_layout = b.as_class().unwrap().instance_layout().unwrap();
    assert_eq!(a_layout.base(), OBJECT_HEADER_SIZE);
    assert_eq!(b_layout.base(), a_layout.size());
    assert!(b_layout.size() >= a_layout.size() + 4);

    let b_field = b_layout.field("b").unwrap();
    assert!(b_field.offset().unwrap() >= a_layout.size());
    // Statics live in their own layout.
    assert!(b_layout.field("count").is_none());
    let statics = b.as_class().unwrap().static_layout().unwrap();
    assert!(statics.field("count").is_some());
}

#[test]
fn virtual_tables_keep_inherited_slots() {
    let vm = hierarchy().build();
    let object = vm.load(OBJECT, true).unwrap();
    let a = vm.load("A", true).unwrap();
    let b = vm.load("B", true).unwrap();

    let (ot, at, bt) = (
        object.vtable().unwrap(),
        a.vtable().unwrap(),
        b.vtable().unwrap(),
    );
    // hashCode, toString | foo, bar | baz
    assert_eq!(ot.len(), 2);
    assert_eq!(at.len(), 4);
    assert_eq!(bt.len(), 5);

    let foo = name(&vm, "foo");
    let void = name(&vm, "()V");
    let a_foo = at.find(&foo, &void).unwrap();
    let b_foo = bt.find(&foo, &void).unwrap();
    assert_eq!(a_foo.slot(), b_foo.slot());
    assert!(Arc::ptr_eq(&b_foo.declaring_type().unwrap(), &b));

    for (i, m) in at.iter().enumerate() {
        let inherited = bt.get(i).unwrap();
        assert_eq!(m.name(), inherited.name());
        assert_eq!(m.signature(), inherited.signature());
    }
    assert!(at.find(&name(&vm, "make"), &name(&vm, "()LA;")).is_none());
    assert!(at.find(&name(&vm, "secret"), &void).is_none());
}

#[test]
fn fields_are_packed_widest_first_without_overlap() {
    let mut w = class("Wide", OBJECT);
    for (n, d) in [
        ("z", "Z"),
        ("s", "S"),
        ("i", "I"),
        ("j", "J"),
        ("b", "B"),
        ("o", "Ljava/lang/Object;"),
        ("c", "C"),
        ("f", "F"),
        ("d", "D"),
    ] {
        w.field(AccessFlags::empty(), n, d);
    }
    let vm = TestVm::new().class("Wide", w.build()).build();
    let wide = vm.load("Wide", true).unwrap();
    let layout = wide.as_class().unwrap().instance_layout().unwrap();

    let mut spans: Vec<(usize, usize)> = layout
        .fields()
        .iter()
        .map(|f| {
            let start = f.offset().unwrap();
            assert_eq!(start % f.width().unwrap(), 0, "{} misaligned", f.name());
            (start, start + f.width().unwrap())
        })
        .collect();
    spans.sort();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
    }
    let total: usize = layout.fields().iter().map(|f| f.width().unwrap()).sum();
    assert!(layout.size() >= OBJECT_HEADER_SIZE + total);

    let j = layout.field("j").unwrap().offset().unwrap();
    let z = layout.field("z").unwrap().offset().unwrap();
    assert!(j < z);
}

#[test]
fn hidden_fields_are_added_only_while_resolving() {
    let vm = hierarchy().build();
    let a = vm.load("A", false).unwrap();
    let hidden = [HiddenField::new("vmdata", "J", AccessFlags::PRIVATE)];
    a.resolve_with_hidden_fields(&hidden).unwrap();

    let class = a.as_class().unwrap();
    let layout = class.instance_layout().unwrap();
    let vmdata = layout.field("vmdata").unwrap();
    assert!(vmdata.is_hidden());
    assert!(class.declared_fields().iter().all(|f| !f.is_hidden()));
    assert!(a
        .find_virtual_field(&name(&vm, "vmdata"), &name(&vm, "J"))
        .is_err());

    assert!(matches!(
        a.resolve_with_hidden_fields(&hidden).unwrap_err(),
        Error::IllegalState(_)
    ));
    a.resolve().unwrap();
}

#[test]
fn lookups_walk_the_right_scopes() {
    let vm = hierarchy().build();
    let b = vm.load("B", false).unwrap();
    let void = name(&vm, "()V");

    let bar = b.find_virtual_method(&name(&vm, "bar"), &void).unwrap();
    assert_eq!(bar.declaring_type().unwrap().name().as_str(), "A");

    // Static lookups never look at superclasses.
    let make = name(&vm, "make");
    let make_sig = name(&vm, "()LA;");
    assert!(matches!(
        b.find_static_method(&make, &make_sig).unwrap_err(),
        Error::NoSuchMethod { .. }
    ));
    let a = vm.load("A", false).unwrap();
    assert!(a.find_static_method(&make, &make_sig).unwrap().is_static());

    assert!(matches!(
        b.find_static_method(&name(&vm, "foo"), &void).unwrap_err(),
        Error::IncompatibleUse(_)
    ));
    assert!(matches!(
        a.find_virtual_method(&make, &make_sig).unwrap_err(),
        Error::IncompatibleUse(_)
    ));

    let int = name(&vm, "I");
    assert!(b.find_static_field(&name(&vm, "count"), &int).is_ok());
    assert!(matches!(
        b.find_virtual_field(&name(&vm, "count"), &int).unwrap_err(),
        Error::IncompatibleUse(_)
    ));
    assert!(matches!(
        b.find_static_field(&name(&vm, "b"), &int).unwrap_err(),
        Error::IncompatibleUse(_)
    ));
    assert!(matches!(
        b.find_virtual_field(&name(&vm, "nope"), &int).unwrap_err(),
        Error::NoSuchField { .. }
    ));
    assert_eq!(
        b.find_virtual_field(&name(&vm, "a"), &name(&vm, "J"))
            .unwrap()
            .declaring_type()
            .unwrap()
            .name()
            .as_str(),
        "A"
    );
}

#[test]
fn interface_methods_are_found_through_superinterfaces() {
    let mut runnable = interface("Runnable");
    runnable.method(
        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        "run",
        "()V",
    );
    let mut task = interface("Task");
    task.interface("Runnable");
    let mut job = class("Job", OBJECT);
    job.access(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .interface("Task");

    let vm = TestVm::new()
        .class("Runnable", runnable.build())
        .class("Task", task.build())
        .class("Job", job.build())
        .build();
    let run = name(&vm, "run");
    let void = name(&vm, "()V");

    let task = vm.load("Task", true).unwrap();
    let found = task.find_interface_method(&run, &void).unwrap();
    assert_eq!(found.declaring_type().unwrap().name().as_str(), "Runnable");

    let job = vm.load("Job", true).unwrap();
    assert!(job.find_virtual_method(&run, &void).is_ok());
    assert!(job.find_interface_method(&run, &void).is_ok());
    // Inherited from the root class through the superclass chain.
    assert!(task
        .find_interface_method(&name(&vm, "hashCode"), &name(&vm, "()I"))
        .is_ok());
    assert!(matches!(
        task.find_interface_method(&name(&vm, "walk"), &void)
            .unwrap_err(),
        Error::NoSuchMethod { .. }
    ));

    let all: Vec<String> = job
        .all_interfaces()
        .unwrap()
        .iter()
        .map(|i| i.name().to_string())
        .collect();
    assert_eq!(all, ["Task", "Runnable"]);
}

#[test]
fn nested_arrays_share_the_primitive_singleton() {
    let vm = TestVm::new().build();
    let int = vm.bootstrap().primitive(PrimitiveKind::Int).unwrap();
    let outer = int.get_array(2).unwrap();
    let inner = int.get_array(1).unwrap();

    assert_eq!(outer.name().as_str(), "[[I");
    assert_eq!(inner.name().as_str(), "[I");
    assert!(!Arc::ptr_eq(&outer, &inner));
    assert!(Arc::ptr_eq(&outer.component_type().unwrap(), &inner));
    assert!(Arc::ptr_eq(&inner.component_type().unwrap(), &int));
    assert!(Arc::ptr_eq(&inner.array_type().unwrap(), &outer));
    assert_eq!(outer.as_array().unwrap().dimensions(), 2);
    assert!(Arc::ptr_eq(&outer.as_array().unwrap().element().unwrap(), &int));

    let by_name = vm.load("[[I", false).unwrap();
    assert!(Arc::ptr_eq(&by_name, &outer));
    assert!(Arc::ptr_eq(&int.get_array(0).unwrap(), &int));
}

#[test]
fn arrays_resolve_against_the_root_class() {
    let vm = hierarchy().build();
    let b_array = vm.load("[LB;", true).unwrap();
    assert_eq!(b_array.state(), TypeState::Resolved);

    let object = vm.object_class().unwrap();
    assert!(Arc::ptr_eq(&b_array.super_class().unwrap().unwrap(), &object));
    assert!(Arc::ptr_eq(
        &b_array.vtable().unwrap(),
        &object.vtable().unwrap()
    ));
    assert!(b_array
        .find_virtual_method(&name(&vm, "hashCode"), &name(&vm, "()I"))
        .is_ok());
    assert_eq!(b_array.descriptor(), "[LB;");
}

#[test]
fn arrays_of_void_do_not_exist() {
    let vm = TestVm::new().build();
    let void = vm.bootstrap().primitive(PrimitiveKind::Void).unwrap();
    assert!(matches!(
        void.array_type().unwrap_err(),
        Error::IllegalState(_)
    ));
    assert!(vm.load("[V", false).is_err());
}

#[test]
fn arrays_live_in_their_component_loader() {
    let vm = TestVm::new().build();
    let child = vm.new_loader(None);
    let c = child
        .define_class(&name(&vm, "C"), class("C", OBJECT).build())
        .unwrap();
    let array = c.array_type().unwrap();
    assert!(array.defined_by(&child));
    assert!(vm.bootstrap().lookup(array.name()).is_none());

    let object_array = child
        .load_or_throw(&name(&vm, "[Ljava/lang/Object;"), false)
        .unwrap();
    assert!(object_array.defined_by(vm.bootstrap()));
    assert!(child.lookup(object_array.name()).is_some());
}

#[test]
fn assignability_follows_the_hierarchy() {
    let mut i = interface("I");
    i.method(AccessFlags::PUBLIC | AccessFlags::ABSTRACT, "go", "()V");
    let mut c = class("C", "A");
    c.interface("I");
    let vm = hierarchy()
        .class("I", i.build())
        .class("C", c.build())
        .class("java/lang/Cloneable", interface("java/lang/Cloneable").build())
        .build();
    let load = |n: &str| vm.load(n, true).unwrap();
    let (object, a, b, c, i) = (load(OBJECT), load("A"), load("B"), load("C"), load("I"));

    assert!(b.is_assignable_to(&a).unwrap());
    assert!(!a.is_assignable_to(&b).unwrap());
    assert!(c.is_assignable_to(&i).unwrap());
    assert!(!b.is_assignable_to(&i).unwrap());
    assert!(i.is_assignable_to(&object).unwrap());

    let ints = load("[I");
    assert!(ints.is_assignable_to(&object).unwrap());
    assert!(ints.is_assignable_to(&load("java/lang/Cloneable")).unwrap());
    assert!(!ints.is_assignable_to(&load("[J")).unwrap());
    assert!(load("[LB;").is_assignable_to(&load("[LA;")).unwrap());
    assert!(!load("[LA;").is_assignable_to(&load("[LB;")).unwrap());

    let int = vm.bootstrap().primitive(PrimitiveKind::Int).unwrap();
    assert!(int.is_assignable_to(&int).unwrap());
    assert!(!int.is_assignable_to(&object).unwrap());
}

#[test]
fn native_names_are_mangled_and_registered() {
    let vm = TestVm::new()
        .class("my_pkg/A", class("my_pkg/A", OBJECT).build())
        .build();
    let a = vm.load("my_pkg/A", false).unwrap();
    assert_eq!(a.native_name().unwrap(), "Lmy_1pkg_A_2");
    assert_eq!(
        a.as_class().unwrap().static_native_name(&a),
        "static_my_1pkg_A"
    );

    let found = vm.bootstrap().type_for_native_name("Lmy_1pkg_A_2").unwrap();
    assert!(Arc::ptr_eq(&found, &a));

    let int = vm.bootstrap().primitive(PrimitiveKind::Int).unwrap();
    assert_eq!(int.native_name().unwrap(), "I");
    assert_eq!(int.get_array(2).unwrap().native_name().unwrap(), "_3_3I");
}

#[test]
fn natives_can_be_registered_explicitly() {
    let mut n = class("N", OBJECT);
    n.method(
        AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE,
        "add",
        "(II)I",
    )
    .method(
        AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE,
        "unbound",
        "()V",
    )
    .method(AccessFlags::PUBLIC, "plain", "()V");
    let vm = TestVm::new().class("N", n.build()).build();
    let ty = vm.load("N", false).unwrap();

    ty.register_native("add", "(II)I", 0x1234).unwrap();
    let add = ty
        .find_static_method(&name(&vm, "add"), &name(&vm, "(II)I"))
        .unwrap();
    assert_eq!(add.native_address(), Some(0x1234));
    assert_eq!(add.bind_native().unwrap(), 0x1234);

    assert!(matches!(
        ty.register_native("plain", "()V", 1).unwrap_err(),
        Error::NoSuchMethod { .. }
    ));
    assert!(matches!(
        ty.register_native("missing", "()V", 1).unwrap_err(),
        Error::NoSuchMethod { .. }
    ));

    let unbound = ty
        .find_static_method(&name(&vm, "unbound"), &name(&vm, "()V"))
        .unwrap();
    assert!(matches!(
        unbound.bind_native().unwrap_err(),
        Error::UnsatisfiedLink(_)
    ));
}
