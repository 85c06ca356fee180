//! Classes: fields, constructors, inheritance, statics, destructors and
//! synchronized methods.

use super::helpers::*;
use crate::error::RuntimeErrorKind;
use crate::typesys::Data;

#[test]
fn constructor_initializes_fields() {
    let src = r#"
        public class Point {
            public int x;
            public int y;
            void Point(int a, int b) { x = a; y = b; }
            public int sum() { return x + y; }
        }
        int main() {
            Point p = new Point(3, 4);
            return p.sum() + p.x;
        }
    "#;
    assert_eq!(int_result(src), 10);
}

#[test]
fn field_defaults_run_on_new() {
    let src = r#"
        public class Settings {
            public int retries = 2 + 1;
            public string label = "job";
        }
        string main() {
            Settings s = new Settings();
            return s.label + ":" + s.retries;
        }
    "#;
    assert_eq!(text_result(src), "job:3");
}

#[test]
fn methods_may_call_each_other_unqualified() {
    let src = r#"
        public class Counter {
            public int n = 0;
            void bump() { n = n + 1; }
            public void bumpTwice() { bump(); bump(); }
        }
        int main() {
            Counter c = new Counter();
            c.bumpTwice();
            return c.n;
        }
    "#;
    assert_eq!(int_result(src), 2);
}

#[test]
fn inherited_fields_and_methods_are_visible() {
    let src = r#"
        public class Animal {
            public string name = "?";
            public string who() { return name; }
        }
        public class Dog extends Animal {
            void Dog() { name = "rex"; }
        }
        string main() {
            Dog d = new Dog();
            return d.who();
        }
    "#;
    assert_eq!(text_result(src), "rex");
}

#[test]
fn overridden_methods_dispatch_on_the_runtime_class() {
    let src = r#"
        public class Shape {
            public string kind() { return "shape"; }
            public string describe() { return "a " + kind(); }
        }
        public class Circle extends Shape {
            public string kind() { return "circle"; }
        }
        string main() {
            Shape s = new Circle();
            return s.describe();
        }
    "#;
    assert_eq!(text_result(src), "a circle");
}

#[test]
fn method_overloads_pick_by_argument_types() {
    let src = r#"
        public class Fmt {
            public string show(int n) { return "i"; }
            public string show(string s) { return "s"; }
        }
        string main() {
            Fmt f = new Fmt();
            return f.show(1) + f.show("x");
        }
    "#;
    assert_eq!(text_result(src), "is");
}

#[test]
fn static_fields_are_shared_between_instances() {
    let src = r#"
        public class Ticket {
            static int issued = 0;
            public int serial;
            void Ticket() { issued = issued + 1; serial = issued; }
        }
        int main() {
            Ticket a = new Ticket();
            Ticket b = new Ticket();
            Ticket c = new Ticket();
            return c.serial * 10 + a.issued;
        }
    "#;
    assert_eq!(int_result(src), 33);
}

#[test]
fn static_writes_land_in_the_session_registry() {
    let src = r#"
        public class Ticket {
            static int issued = 0;
            void Ticket() { issued = issued + 1; }
        }
        int main() {
            Ticket a = new Ticket();
            Ticket b = new Ticket();
            return 0;
        }
    "#;
    let (_proc, session) = run_main(src);
    let id = session.classes.find("Ticket").expect("class registered");
    let field = session
        .classes
        .get(id)
        .unwrap()
        .fields
        .iter()
        .find(|f| f.name == "issued")
        .expect("static field");
    assert!(field.is_static);
    let v = field.static_value.as_ref().expect("initialized");
    assert_eq!(v.data, Data::Int(2));
}

#[test]
fn field_access_through_null_fails() {
    let src = r#"
        public class Point { public int x; }
        int main() {
            Point p = null;
            return p.x;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::NullPointer);
}

#[test]
fn field_access_through_an_unset_pointer_fails() {
    let src = r#"
        public class Point { public int x; }
        int main() {
            Point p;
            return p.x;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::NotInit);
}

#[test]
fn pointer_comparison_tracks_identity() {
    let src = r#"
        public class Node { public int v; }
        boolean main() {
            Node a = new Node();
            Node b = a;
            Node c = new Node();
            return a == b and a != c and c != null;
        }
    "#;
    assert!(bool_result(src));
}

#[test]
fn destructor_runs_when_the_last_reference_drops() {
    let src = r#"
        public class Tracker {
            static int gone = 0;
            void ~Tracker() { gone = gone + 1; }
        }
        int main() {
            Tracker t = new Tracker();
            t = null;
            Tracker probe = new Tracker();
            return probe.gone;
        }
    "#;
    assert_eq!(int_result(src), 1);
}

#[test]
fn aliased_instances_are_destroyed_once() {
    let src = r#"
        public class Tracker {
            static int gone = 0;
            void ~Tracker() { gone = gone + 1; }
        }
        int main() {
            Tracker a = new Tracker();
            Tracker b = a;
            a = null;
            b = null;
            Tracker probe = new Tracker();
            return probe.gone;
        }
    "#;
    assert_eq!(int_result(src), 1);
}

#[test]
fn synchronized_methods_reenter_within_one_process() {
    let src = r#"
        public class Gate {
            static int depth = 0;
            public synchronized int enter(int n) {
                if (n <= 0) return depth;
                depth = depth + 1;
                return enter(n - 1);
            }
        }
        int main() {
            Gate g = new Gate();
            return g.enter(3);
        }
    "#;
    let (proc, session) = run_main(src);
    assert_eq!(proc.result().and_then(|v| v.as_i32().ok()), Some(3));
    let id = session.classes.find("Gate").expect("class registered");
    assert_eq!(session.classes.get(id).unwrap().lock.owner(), None);
}
