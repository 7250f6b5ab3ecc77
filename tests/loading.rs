mod common;

use common::{class, name, TestVm, OBJECT};
use jvm_loader::{
    classfile::{builder::ClassFileBuilder, AccessFlags},
    layout::OBJECT_HEADER_SIZE,
    loader::ClassLoader,
    DelegateLoader, Error, Name, Result, TypeRef, TypeState, Vm,
};
use std::{
    collections::HashMap,
    fs::File,
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[test]
fn root_class_is_its_own_superclass() {
    let vm = TestVm::new().build();
    let object = vm.load(OBJECT, true).unwrap();

    assert_eq!(object.state(), TypeState::Resolved);
    let parent = object.super_class().unwrap().unwrap();
    assert!(Arc::ptr_eq(&parent, &object));
    assert!(object.parent().unwrap().is_none());

    let layout = object.as_class().unwrap().instance_layout().unwrap();
    assert!(layout.fields().is_empty());
    assert_eq!(layout.size(), OBJECT_HEADER_SIZE);
    // <init> is not dispatched virtually
    assert_eq!(object.vtable().unwrap().len(), 2);
}

#[test]
fn loading_without_resolving_stops_at_loaded() {
    let vm = TestVm::new()
        .class("A", class("A", OBJECT).build())
        .build();
    let a = vm.load("A", false).unwrap();
    assert_eq!(a.state(), TypeState::Loaded);
    assert!(a.vtable().is_err());

    a.resolve().unwrap();
    assert_eq!(a.state(), TypeState::Resolved);
    a.resolve().unwrap();
    assert_eq!(a.state(), TypeState::Resolved);
}

#[test]
fn lookups_return_the_same_handle() {
    let vm = TestVm::new()
        .class("A", class("A", OBJECT).build())
        .build();
    let first = vm.load("A", false).unwrap();
    let second = vm.load("A", true).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &vm.bootstrap().lookup_str("A").unwrap()));
}

#[test]
fn missing_bytes_are_class_not_found() {
    let vm = TestVm::new().build();
    assert_eq!(
        vm.load("does/not/Exist", false).unwrap_err(),
        Error::ClassNotFound("does/not/Exist".into())
    );
}

#[test]
fn missing_supertypes_are_no_class_def_found() {
    let vm = TestVm::new()
        .class("A", class("A", "Missing").build())
        .build();
    let err = vm.load("A", true).unwrap_err();
    assert_eq!(err, Error::NoClassDefFound("Missing".into()));
    assert!(err.is_not_found());
}

#[test]
fn bytes_for_another_class_are_rejected() {
    let vm = TestVm::new()
        .class("A", class("B", OBJECT).build())
        .build();
    assert!(matches!(
        vm.load("A", false).unwrap_err(),
        Error::ClassFormat { class, .. } if class == "A"
    ));
}

#[test]
fn malformed_bytes_are_class_format_errors() {
    let vm = TestVm::new().class("A", vec![0xde, 0xad]).build();
    assert!(matches!(
        vm.load("A", false).unwrap_err(),
        Error::ClassFormat { .. }
    ));
}

#[test]
fn child_loaders_delegate_to_the_bootstrap_loader() {
    let vm = TestVm::new()
        .class("A", class("A", OBJECT).build())
        .build();
    let child = vm.new_loader(None);

    let from_boot = vm.load("A", false).unwrap();
    let from_child = child.load_or_throw(&name(&vm, "A"), false).unwrap();
    assert!(Arc::ptr_eq(&from_boot, &from_child));
    assert!(from_child.defined_by(vm.bootstrap()));
    assert!(!from_child.defined_by(&child));

    // The linkage cache answers later lookups without asking again.
    let cached = child.lookup(&name(&vm, "A")).unwrap();
    assert!(Arc::ptr_eq(&cached, &from_boot));
}

#[test]
fn child_loaders_define_their_own_classes() {
    let vm = TestVm::new().build();
    let child = vm.new_loader(None);
    let c = name(&vm, "C");

    let defined = child.define_class(&c, class("C", OBJECT).build()).unwrap();
    assert!(defined.defined_by(&child));
    assert!(vm.bootstrap().lookup(&c).is_none());

    defined.resolve().unwrap();
    let parent = defined.parent().unwrap().unwrap();
    assert!(parent.defined_by(vm.bootstrap()));

    // A second definition keeps the first type.
    let again = child.define_class(&c, class("C", OBJECT).build()).unwrap();
    assert!(Arc::ptr_eq(&defined, &again));
}

#[test]
fn array_names_cannot_be_defined() {
    let vm = TestVm::new().build();
    let err = vm
        .bootstrap()
        .define_class(&name(&vm, "[I"), vec![])
        .unwrap_err();
    assert_eq!(err, Error::IllegalName("[I".into()));
}

/// Serves classes from its own map and defers everything else upward.
struct MapDelegate {
    classes: HashMap<String, Vec<u8>>,
    asked: AtomicUsize,
}

impl DelegateLoader for MapDelegate {
    fn load_class(&self, loader: &ClassLoader, name: &Name) -> Result<Option<TypeRef>> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        match self.classes.get(name.as_str()) {
            Some(bytes) => loader.define_class(name, bytes.clone()).map(Some),
            None => loader.bootstrap().load_class(name, false, false),
        }
    }
}

#[test]
fn delegates_define_classes_in_their_loader() {
    let vm = TestVm::new().build();
    let delegate = Arc::new(MapDelegate {
        classes: HashMap::from([("Plugin".to_string(), class("Plugin", OBJECT).build())]),
        asked: AtomicUsize::new(0),
    });
    let child = vm.new_loader(Some(delegate.clone()));

    let plugin = child.load_or_throw(&name(&vm, "Plugin"), true).unwrap();
    assert!(plugin.defined_by(&child));
    assert!(vm.load("Plugin", false).is_err());

    let object = child.load_or_throw(&name(&vm, OBJECT), false).unwrap();
    assert!(object.defined_by(vm.bootstrap()));

    // Both names are cached in the child now.
    let asked = delegate.asked.load(Ordering::SeqCst);
    child.load_or_throw(&name(&vm, "Plugin"), false).unwrap();
    child.load_or_throw(&name(&vm, OBJECT), false).unwrap();
    assert_eq!(delegate.asked.load(Ordering::SeqCst), asked);
}

#[test]
fn source_names_use_dots() {
    let vm = TestVm::new()
        .class("pkg/A", class("pkg/A", OBJECT).build())
        .build();
    let a = vm
        .bootstrap()
        .load_class_from_source_name("pkg.A", false, true)
        .unwrap()
        .unwrap();
    assert_eq!(a.name().as_str(), "pkg/A");

    let array = vm
        .bootstrap()
        .load_class_from_source_name("[Lpkg.A;", false, true)
        .unwrap()
        .unwrap();
    assert_eq!(array.name().as_str(), "[Lpkg/A;");

    assert_eq!(
        vm.bootstrap()
            .load_class_from_source_name("pkg/A", false, true)
            .unwrap_err(),
        Error::IllegalName("pkg/A".into())
    );
    assert_eq!(
        vm.bootstrap()
            .load_class_from_source_name("pkg.Missing", false, false)
            .unwrap(),
        None
    );
}

#[test]
fn class_path_reads_directories_and_archives() {
    let dir = tempfile::tempdir().unwrap();
    let classes = dir.path().join("classes");
    std::fs::create_dir_all(classes.join("java/lang")).unwrap();
    std::fs::write(classes.join("java/lang/Object.class"), common::object_class()).unwrap();

    let jar = dir.path().join("app.jar");
    let mut zip = zip::ZipWriter::new(File::create(&jar).unwrap());
    zip.start_file("app/Main.class", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(&class("app/Main", OBJECT).build()).unwrap();
    zip.finish().unwrap();

    let text = std::env::join_paths([&classes, &jar])
        .unwrap()
        .into_string()
        .unwrap();
    let vm = Vm::builder().class_path(&text).unwrap().build().unwrap();
    assert_eq!(vm.context().class_path().len(), 2);

    let main = vm.load("app/Main", true).unwrap();
    let parent = main.parent().unwrap().unwrap();
    assert_eq!(parent.name().as_str(), OBJECT);
}

#[test]
fn interfaces_cannot_be_extended() {
    let vm = TestVm::new()
        .class("I", common::interface("I").build())
        .class("A", class("A", "I").build())
        .build();
    assert!(matches!(
        vm.load("A", true).unwrap_err(),
        Error::ClassFormat { .. }
    ));
}

#[test]
fn only_interfaces_can_be_implemented() {
    let mut a = class("A", OBJECT);
    a.interface("B");
    let vm = TestVm::new()
        .class("A", a.build())
        .class("B", class("B", OBJECT).build())
        .build();
    assert!(matches!(
        vm.load("A", true).unwrap_err(),
        Error::ClassFormat { .. }
    ));
}

#[test]
fn classes_without_a_superclass_must_be_the_root() {
    let vm = TestVm::new()
        .class("Orphan", ClassFileBuilder::new("Orphan").build())
        .build();
    assert!(matches!(
        vm.load("Orphan", true).unwrap_err(),
        Error::ClassFormat { .. }
    ));
}

#[test]
fn supertype_cycles_are_class_circularity() {
    let vm = TestVm::new()
        .class("A", class("A", "B").build())
        .class("B", class("B", "A").build())
        .build();
    assert!(matches!(
        vm.load("A", true).unwrap_err(),
        Error::ClassCircularity(_)
    ));
}

#[test]
fn bad_constant_value_lengths_fail_loading() {
    let mut k = class("K", OBJECT);
    k.raw_field(
        AccessFlags::STATIC,
        "x",
        "I",
        &[("ConstantValue", &[0, 1, 2])],
    );
    let vm = TestVm::new().class("K", k.build()).build();
    assert!(matches!(
        vm.load("K", false).unwrap_err(),
        Error::ClassFormat { .. }
    ));
}

#[test]
fn attributes_are_found_by_interned_name() {
    let mut k = class("K", OBJECT);
    k.method_with_code(AccessFlags::PUBLIC, "run", "()V", &[0x00, 0xb1])
        .method(AccessFlags::PUBLIC, "<init>", "()V")
        .method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "poke", "()V");
    let vm = TestVm::new().class("K", k.build()).build();
    let ty = vm.load("K", false).unwrap();
    let class = ty.as_class().unwrap();
    let void = name(&vm, "()V");

    let run = class.declared_method(&name(&vm, "run"), &void).unwrap();
    assert_eq!(run.bytecode().unwrap(), Some(&[0x00, 0xb1][..]));
    assert!(!run.is_initializer());
    assert!(run.is_virtual());

    let init = class.declared_method(&name(&vm, "<init>"), &void).unwrap();
    assert!(init.is_initializer());
    assert!(!init.is_virtual());

    let poke = class.declared_method(&name(&vm, "poke"), &void).unwrap();
    assert_eq!(poke.bytecode().unwrap(), None);

    let code = &vm.context().well_known().code;
    assert!(run.attributes().get(code).is_some());
    // A same-text name from another table is a different handle.
    let foreign = jvm_loader::NameTable::new().intern("Code");
    assert!(run.attributes().get(&foreign).is_none());
}
