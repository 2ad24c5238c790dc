#[cfg(test)]
mod interpreter_tests {
    use loxwalk as lox;

    use std::cell::RefCell;
    use std::rc::Rc;

    use lox::session::{RunStatus, Session};
    use pretty_assertions::assert_eq;

    struct Harness {
        session: Session,
        out: Rc<RefCell<Vec<u8>>>,
        err: Rc<RefCell<Vec<u8>>>,
    }

    impl Harness {
        fn new() -> Self {
            let out = Rc::new(RefCell::new(Vec::new()));
            let err = Rc::new(RefCell::new(Vec::new()));
            let session = Session::new(out.clone(), err.clone());
            Self { session, out, err }
        }

        /// Run one chunk of source and drain what it wrote to both sinks.
        fn run(&mut self, source: &str) -> (String, String, RunStatus) {
            let status = self.session.run(source);
            let out = String::from_utf8(self.out.borrow_mut().split_off(0)).expect("utf-8 output");
            let err = String::from_utf8(self.err.borrow_mut().split_off(0)).expect("utf-8 output");
            (out, err, status)
        }
    }

    fn run(source: &str) -> (String, String, RunStatus) {
        Harness::new().run(source)
    }

    fn output_of(source: &str) -> String {
        let (out, err, status) = run(source);
        assert_eq!(err, "");
        assert_eq!(status, RunStatus::Ok);
        out
    }

    #[test]
    fn arithmetic_and_number_display() {
        assert_eq!(
            output_of("print 1 + 1; print 10 / 4; print -3 * 2; print 1.5 + 1;"),
            "2\n2.5\n-6\n2.5\n"
        );
    }

    #[test]
    fn division_by_zero_follows_ieee() {
        assert_eq!(
            output_of("print 1/0; print -1/0; print 0/0; print 0/0 == 0/0;"),
            "Infinity\n-Infinity\nNaN\ntrue\n"
        );
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            output_of("var s = \"foo\" + \"bar\"; print s; print s + \"\";"),
            "foobar\nfoobar\n"
        );
    }

    #[test]
    fn mixed_plus_is_a_runtime_error() {
        let (out, err, status) = run("print \"a\" + 1;");
        assert_eq!(out, "");
        assert_eq!(err, "Operands must be two numbers or two strings.\n[line 1]\n");
        assert_eq!(status, RunStatus::RuntimeError);
    }

    #[test]
    fn plus_rejects_infinite_operands() {
        let (_, err, status) = run("var inf = 1/0;\nprint inf + 1;");
        assert_eq!(err, "Operands must be two numbers or two strings.\n[line 2]\n");
        assert_eq!(status, RunStatus::RuntimeError);
    }

    #[test]
    fn equality_without_coercion() {
        assert_eq!(
            output_of(
                "print 1 == 1; print \"a\" == \"a\"; print nil == false; \
                 print 1 == \"1\"; print nil == nil; print clock == clock;"
            ),
            "true\ntrue\nfalse\nfalse\ntrue\ntrue\n"
        );
    }

    #[test]
    fn truthiness_in_conditions() {
        assert_eq!(
            output_of(
                "if (0) print \"zero\"; if (\"\") print \"empty\"; \
                 if (nil) print \"nil\"; else print \"else\";"
            ),
            "zero\nempty\nelse\n"
        );
    }

    #[test]
    fn logical_operators_short_circuit_and_yield_operands() {
        let source = "fun boom() { print \"boom\"; return true; }\n\
                      print false and boom();\n\
                      print true or boom();\n\
                      print nil or \"x\";\n\
                      print 1 and 2;";
        assert_eq!(output_of(source), "false\ntrue\nx\n2\n");
    }

    #[test]
    fn block_shadowing() {
        assert_eq!(
            output_of("var a = 1; { var a = 2; print a; } print a;"),
            "2\n1\n"
        );
    }

    #[test]
    fn assignment_is_an_expression() {
        assert_eq!(
            output_of("var a; var b; a = b = 3; print a; print b; print a = 4;"),
            "3\n3\n4\n"
        );
    }

    #[test]
    fn uninitialized_variable_is_nil() {
        assert_eq!(output_of("var x; print x;"), "nil\n");
    }

    #[test]
    fn closures_keep_their_own_state() {
        let source = "fun makeCounter() {\n\
                        var i = 0;\n\
                        fun count() { i = i + 1; print i; }\n\
                        return count;\n\
                      }\n\
                      var c = makeCounter();\n\
                      c(); c(); c();\n\
                      var d = makeCounter();\n\
                      d();";
        assert_eq!(output_of(source), "1\n2\n3\n1\n");
    }

    #[test]
    fn closures_bind_lexically_not_dynamically() {
        let source = "var a = \"global\";\n\
                      {\n\
                        fun showA() { print a; }\n\
                        showA();\n\
                        var a = \"block\";\n\
                        showA();\n\
                      }";
        assert_eq!(output_of(source), "global\nglobal\n");
    }

    #[test]
    fn recursion_and_for_loops() {
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); }\n\
                      for (var i = 0; i < 8; i = i + 1) print fib(i);";
        assert_eq!(output_of(source), "0\n1\n1\n2\n3\n5\n8\n13\n");
    }

    #[test]
    fn globals_may_be_referenced_before_declaration() {
        let source = "fun a() { return b(); }\n\
                      fun b() { return \"b\"; }\n\
                      print a();";
        assert_eq!(output_of(source), "b\n");
    }

    #[test]
    fn return_unwinds_nested_loops_and_blocks() {
        let source = "fun f() {\n\
                        var i = 0;\n\
                        while (true) {\n\
                          { if (i == 3) return i; }\n\
                          i = i + 1;\n\
                        }\n\
                      }\n\
                      print f();\n\
                      fun g() { return; }\n\
                      print g();";
        assert_eq!(output_of(source), "3\nnil\n");
    }

    #[test]
    fn callables_display() {
        assert_eq!(
            output_of("fun f() {} print f; print clock; print f();"),
            "<fn f>\n<native fn>\nnil\n"
        );
    }

    #[test]
    fn clock_returns_seconds() {
        assert_eq!(output_of("print clock() > 0;"), "true\n");
    }

    #[test]
    fn arity_mismatch_stops_execution() {
        let (out, err, status) = run("fun f(a) { print a; }\nf();\nprint \"after\";");
        assert_eq!(out, "");
        assert_eq!(err, "Expected 1 arguments but got 0.\n[line 2]\n");
        assert_eq!(status, RunStatus::RuntimeError);

        let (_, err, _) = run("fun f(a) {} f(1, 2);");
        assert_eq!(err, "Expected 1 arguments but got 2.\n[line 1]\n");
    }

    #[test]
    fn calling_a_non_callable() {
        let (_, err, status) = run("\"abc\"();");
        assert_eq!(err, "Can only call functions and classes.\n[line 1]\n");
        assert_eq!(status, RunStatus::RuntimeError);
    }

    #[test]
    fn operand_type_errors() {
        let (_, err, _) = run("print 1 < \"a\";");
        assert_eq!(err, "Operands must be numbers.\n[line 1]\n");

        let (_, err, _) = run("print -\"a\";");
        assert_eq!(err, "Operand must be a number.\n[line 1]\n");
    }

    #[test]
    fn runtime_error_keeps_earlier_output() {
        let (out, err, status) = run("print 1;\nprint x;\nprint 2;");
        assert_eq!(out, "1\n");
        assert_eq!(err, "Undefined variable 'x'.\n[line 2]\n");
        assert_eq!(status, RunStatus::RuntimeError);

        let (_, err, _) = run("y = 1;");
        assert_eq!(err, "Undefined variable 'y'.\n[line 1]\n");
    }

    #[test]
    fn runaway_recursion_is_a_runtime_error() {
        let (_, err, status) = run("fun f() { f(); }\nf();");
        assert_eq!(err, "Stack overflow.\n[line 1]\n");
        assert_eq!(status, RunStatus::RuntimeError);
    }

    #[test]
    fn deep_recursion_below_the_limit_runs_on_a_default_thread() {
        let source = "fun sum(n) { if (n == 0) return 0; return n + sum(n - 1); }\n\
                      print sum(200);\n\
                      print sum(255);";
        assert_eq!(output_of(source), "20100\n32640\n");
    }

    #[test]
    fn deeply_nested_expressions_parse_and_evaluate() {
        let depth = 2_000;
        let source = format!("print {}1{};", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(output_of(&source), "1\n");

        let source = format!("print {}true;", "!".repeat(depth));
        assert_eq!(output_of(&source), "true\n");
    }

    struct ClosedSink;

    impl std::io::Write for ClosedSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_print_is_a_runtime_error() {
        let err = Rc::new(RefCell::new(Vec::new()));
        let mut session = Session::new(Rc::new(RefCell::new(ClosedSink)), err.clone());

        let status = session.run("var a = 1;\nprint a;\na = 2;");
        assert_eq!(status, RunStatus::RuntimeError);
        assert_eq!(
            String::from_utf8_lossy(&err.borrow()),
            "Failed to write output: sink closed.\n[line 2]\n"
        );
    }

    #[test]
    fn static_errors_prevent_execution() {
        let (out, err, status) = run("print 1;\nprint ;\nvar = 2;");
        assert_eq!(out, "");
        assert_eq!(
            err,
            "[line 2] Error  at ';': Expect expression.\n\
             [line 3] Error  at '=': Expect variable name.\n"
        );
        assert_eq!(status, RunStatus::StaticError);
    }

    #[test]
    fn lexical_errors_prevent_execution() {
        let (out, err, status) = run("print 1; @");
        assert_eq!(out, "");
        assert_eq!(err, "[line 1] Error : Unexpected character.\n");
        assert_eq!(status, RunStatus::StaticError);
    }

    #[test]
    fn resolution_errors_prevent_execution() {
        let (out, err, status) = run("print 1;\n{ var a = a; }");
        assert_eq!(out, "");
        assert_eq!(
            err,
            "[line 2] Error  at 'a': Can't read local variable in its own initializer.\n"
        );
        assert_eq!(status, RunStatus::StaticError);
    }

    #[test]
    fn prompt_session_keeps_state_between_lines() {
        let mut repl = Harness::new();

        let (_, _, status) = repl.run("var g = 10; { var l = 1; print l; }");
        assert_eq!(status, RunStatus::Ok);

        // Node ids from the previous line must not leak resolved distances
        // onto this line's references.
        let (out, err, status) = repl.run("{ var z = 5; { print g; } }");
        assert_eq!(err, "");
        assert_eq!(out, "10\n");
        assert_eq!(status, RunStatus::Ok);

        let (_, _, status) = repl.run("print ;");
        assert_eq!(status, RunStatus::StaticError);
        assert!(repl.session.had_error());
        repl.session.reset_error();

        let (out, _, status) = repl.run("fun twice(x) { return x * 2; } print twice(g);");
        assert_eq!(out, "20\n");
        assert_eq!(status, RunStatus::Ok);
    }

    #[test]
    fn prompt_session_survives_runtime_errors() {
        let mut repl = Harness::new();

        let (_, _, status) = repl.run("var a = 1; print nope;");
        assert_eq!(status, RunStatus::RuntimeError);
        assert!(repl.session.had_runtime_error());

        let (out, _, status) = repl.run("print a;");
        assert_eq!(out, "1\n");
        assert_eq!(status, RunStatus::Ok);
    }
}
