use std::{cell::RefCell, rc::Rc};

use anyhow::{Context, anyhow};
use bytes::Bytes;

use super::{EngineConfig, Interpreter};
use crate::{
    error::{Result as EngineResult, SapiError, Throw},
    lexer::Mode,
    parser::parse_program,
    sapi::Sapi,
    value::Value,
};

#[derive(Default)]
pub(crate) struct Captured {
    pub(crate) body: Vec<u8>,
    pub(crate) headers: Vec<String>,
    pub(crate) header_blocks: usize,
    pub(crate) log: Vec<String>,
}

/// A `Sapi` that records everything in memory.
pub(crate) struct BufferSapi {
    captured: Rc<RefCell<Captured>>,
    input: Bytes,
}

impl Sapi for BufferSapi {
    fn write(&mut self, data: &[u8]) -> Result<(), SapiError> {
        self.captured.borrow_mut().body.extend_from_slice(data);
        Ok(())
    }

    fn send_header(&mut self, line: Option<&[u8]>) -> Result<(), SapiError> {
        let mut captured = self.captured.borrow_mut();
        match line {
            Some(line) => captured.headers.push(String::from_utf8_lossy(line).into_owned()),
            None => captured.header_blocks += 1,
        }
        Ok(())
    }

    fn read_input(&mut self, max: usize) -> Result<Bytes, SapiError> {
        let n = max.min(self.input.len());
        Ok(self.input.split_to(n))
    }

    fn log(&mut self, message: &str) {
        self.captured.borrow_mut().log.push(message.to_string());
    }
}

pub(crate) fn interpreter(input: &[u8]) -> (Interpreter, Rc<RefCell<Captured>>) {
    let captured = Rc::new(RefCell::new(Captured::default()));
    let sapi = BufferSapi {
        captured: captured.clone(),
        input: Bytes::copy_from_slice(input),
    };
    let config = EngineConfig {
        expose: None,
        ..EngineConfig::default()
    };
    (Interpreter::new(Box::new(sapi), config), captured)
}

fn describe(err: Throw) -> anyhow::Error {
    match err {
        Throw::Exception(obj) => anyhow!(
            "uncaught {}: {}",
            obj.class().name(),
            Interpreter::exception_message(&obj)
        ),
        other => anyhow!("{other:?}"),
    }
}

fn eval(source: &str) -> anyhow::Result<(Value, String)> {
    let (mut interp, captured) = interpreter(b"");
    let value = interp.eval_source(source).map_err(describe)?;
    let body = String::from_utf8(captured.borrow().body.clone()).context("output is not utf-8")?;
    Ok((value, body))
}

/// Runs every statement of `source`, as a script file would.
fn run(interp: &mut Interpreter, source: &str) -> EngineResult<Value> {
    let stmts = parse_program(source.as_bytes(), Mode::Code)?;
    interp.run_toplevel(&stmts)
}

fn output(source: &str) -> anyhow::Result<String> {
    let (mut interp, captured) = interpreter(b"");
    run(&mut interp, source).map_err(describe)?;
    String::from_utf8(captured.borrow().body.clone()).context("output is not utf-8")
}

fn expect_uncaught(source: &str) -> anyhow::Result<(String, String)> {
    let (mut interp, _) = interpreter(b"");
    match run(&mut interp, source) {
        Err(Throw::Exception(obj)) => Ok((
            obj.class().name().to_string(),
            Interpreter::exception_message(&obj),
        )),
        Err(other) => Err(anyhow!("expected an exception, got {other:?}")),
        Ok(value) => Err(anyhow!("expected an exception, got {value:?}")),
    }
}

#[test]
fn first_expression_is_the_result() -> anyhow::Result<()> {
    let (value, _) = eval("1 + 2 * 3; 99")?;
    assert_eq!(value, Value::Int(7));
    let (value, _) = eval("echo 'x'; 5")?;
    assert_eq!(value, Value::Null);
    Ok(())
}

#[test]
fn echo_and_string_library() -> anyhow::Result<()> {
    let body = output(
        r#"echo strtoupper("abc"), " ", strlen("hello"), " ", str_replace("l", "L", "hello");
        echo "|", implode(",", explode(" ", "a b c")), "|", sprintf("%05.2f/%-3s/%x", 3.14159, "ab", 255);"#,
    )?;
    assert_eq!(body, "ABC 5 heLLo|a,b,c|03.14/ab /ff");
    Ok(())
}

#[test]
fn interpolation_and_heredoc() -> anyhow::Result<()> {
    let body = output(
        "$name = 'world'; $list = ['k' => 'v']; $o = new stdClass; $o->p = 7;\n\
         echo \"hi $name {$list['k']} $o->p\\n\";",
    )?;
    assert_eq!(body, "hi world v 7\n");
    Ok(())
}

#[test]
fn arrays_copy_on_assignment() -> anyhow::Result<()> {
    let body = output(
        "$a = [3, 1, 2]; $b = $a; $b[] = 0; sort($b);\n\
         echo count($a), ':', implode(',', $b), ':', json_encode(['x' => 1, 'y' => [true, null]]);",
    )?;
    assert_eq!(body, "3:0,1,2,3:{\"x\":1,\"y\":[true,null]}");
    Ok(())
}

#[test]
fn references_alias_variables() -> anyhow::Result<()> {
    let body = output(
        "function bump(&$n) { $n++; }\n\
         $x = 1; bump($x); $y = &$x; $y = 10;\n\
         $items = [1, 2, 3]; foreach ($items as &$item) { $item *= 2; } unset($item);\n\
         echo $x, ' ', implode(',', $items);",
    )?;
    assert_eq!(body, "10 2,4,6");
    Ok(())
}

#[test]
fn classes_and_magic_hooks() -> anyhow::Result<()> {
    let body = output(
        r#"class Bag {
            private array $data = [];
            public function __get($name) { return $this->data[$name] ?? "none"; }
            public function __set($name, $value) { $this->data[$name] = $value; }
            public function __isset($name) { return isset($this->data[$name]); }
            public function __unset($name) { unset($this->data[$name]); }
        }
        $bag = new Bag;
        $bag->color = "red";
        echo $bag->color, " ", isset($bag->color) ? "set" : "unset", " ";
        unset($bag->color);
        echo $bag->color, " ", isset($bag->color) ? "set" : "unset";"#,
    )?;
    assert_eq!(body, "red set none unset");
    Ok(())
}

#[test]
fn inheritance_and_static_dispatch() -> anyhow::Result<()> {
    let body = output(
        r#"abstract class Shape {
            public function __construct(protected string $name) {}
            abstract public function area(): float;
            public static function create($size): static { return new static($size); }
            public function describe(): string { return sprintf("%s:%.1f", $this->name, $this->area()); }
        }
        class Square extends Shape {
            public function __construct(private float $side) { parent::__construct("square"); }
            public function area(): float { return $this->side ** 2; }
        }
        echo Square::create(3)->describe(), " ", Square::class, " ", get_parent_class(new Square(1));"#,
    )?;
    assert_eq!(body, "square:9.0 Square Shape");
    Ok(())
}

#[test]
fn exceptions_unwind_through_finally() -> anyhow::Result<()> {
    let body = output(
        r#"function risky($n) {
            try {
                if ($n > 1) { throw new InvalidArgumentException("too big: $n", 7); }
                return "ok";
            } finally {
                echo "[finally]";
            }
        }
        try {
            echo risky(1);
            echo risky(2);
        } catch (LogicException $e) {
            echo get_class($e), "/", $e->getMessage(), "/", $e->getCode();
        }"#,
    )?;
    assert_eq!(body, "[finally]ok[finally]InvalidArgumentException/too big: 2/7");
    Ok(())
}

#[test]
fn uncaught_errors_reach_the_embedder() -> anyhow::Result<()> {
    let (class, message) = expect_uncaught("undefined_function_here();")?;
    assert_eq!(class, "Error");
    assert_eq!(message, "Call to undefined function undefined_function_here()");

    let (class, message) = expect_uncaught("function f(int $a, $b) {} f(1);")?;
    assert_eq!(class, "ArgumentCountError");
    assert_eq!(message, "Too few arguments to function f(), 1 passed and exactly 2 expected");

    let (class, message) = expect_uncaught("$zero = 0; 1 % $zero;")?;
    assert_eq!(class, "DivisionByZeroError");
    assert_eq!(message, "Modulo by zero");
    Ok(())
}

#[test]
fn closures_capture_by_value_and_reference() -> anyhow::Result<()> {
    let body = output(
        "$total = 0; $factor = 3;\n\
         $add = function ($n) use (&$total, $factor) { $total += $n * $factor; };\n\
         array_map($add, [1, 2]); $factor = 100;\n\
         $double = fn($x) => $x * 2;\n\
         echo $total, ' ', implode(',', array_map($double, [1, 2, 3])), ' ', array_sum(array_filter([1, 0, 2, null, 3]));",
    )?;
    assert_eq!(body, "9 2,4,6 6");
    Ok(())
}

#[test]
fn match_and_switch() -> anyhow::Result<()> {
    let body = output(
        r#"function kind($v) {
            return match (true) {
                is_int($v) => "int",
                is_string($v) => "string",
                default => "other",
            };
        }
        $out = [];
        foreach ([1, "a", 1.5] as $v) { $out[] = kind($v); }
        switch ("2") { case 2: $out[] = "two"; case 3: $out[] = "three"; break; default: $out[] = "default"; }
        echo implode(",", $out);"#,
    )?;
    assert_eq!(body, "int,string,other,two,three");
    let (class, message) = expect_uncaught("match (5) { 1 => 'a' };")?;
    assert_eq!(class, "UnhandledMatchError");
    assert_eq!(message, "Unhandled match case 5");
    Ok(())
}

#[test]
fn headers_precede_the_first_output() -> anyhow::Result<()> {
    let (mut interp, captured) = interpreter(b"");
    run(
        &mut interp,
        "header('HTTP/1.1 404 Not Found'); header('X-One: 1'); header('X-One: 2', false);\n\
         setcookie('a', 'b c', 0, '/'); echo 'body'; header('X-Late: 1');",
    )
    .map_err(describe)?;
    let captured = captured.borrow();
    assert_eq!(
        captured.headers,
        [
            "HTTP/1.1 404 Not Found",
            "Content-type: text/html; charset=UTF-8",
            "X-One: 1",
            "X-One: 2",
            "Set-Cookie: a=b%20c; path=/",
        ]
    );
    assert_eq!(captured.header_blocks, 1);
    assert_eq!(captured.body, b"body");
    Ok(())
}

#[test]
fn request_body_is_readable_twice() -> anyhow::Result<()> {
    let (mut interp, captured) = interpreter(br#"{"n": [1, 2]}"#);
    run(
        &mut interp,
        "$raw = file_get_contents('php://input');\n\
         $data = json_decode(file_get_contents('php://input'), true);\n\
         echo strlen($raw), ':', array_sum($data['n']);",
    )
    .map_err(describe)?;
    assert_eq!(captured.borrow().body, b"13:3");
    Ok(())
}

#[test]
fn dumps() -> anyhow::Result<()> {
    let body = output("var_dump([1 => 'a', 'k' => 2.5, 'n' => null]); print_r(['x' => [1]]);")?;
    assert_eq!(
        body,
        "array(3) {\n  [1]=>\n  string(1) \"a\"\n  [\"k\"]=>\n  float(2.5)\n  [\"n\"]=>\n  NULL\n}\n\
         Array\n(\n    [x] => Array\n        (\n            [0] => 1\n        )\n\n)\n"
    );
    Ok(())
}

#[test]
fn error_log_goes_to_the_embedder() -> anyhow::Result<()> {
    let (mut interp, captured) = interpreter(b"");
    interp
        .eval_source("error_log('something happened');")
        .map_err(describe)?;
    assert_eq!(captured.borrow().log, ["something happened"]);
    Ok(())
}

#[test]
fn exit_stops_the_script() -> anyhow::Result<()> {
    let (mut interp, captured) = interpreter(b"");
    let result: EngineResult<Value> = interp.eval_source("echo 'a'; exit('b'); echo 'c';");
    assert!(matches!(result, Err(Throw::Exit(0))), "{result:?}");
    assert_eq!(captured.borrow().body, b"ab");
    Ok(())
}

#[test]
fn declarations_inside_function_bodies() -> anyhow::Result<()> {
    let (mut interp, _) = interpreter(b"");
    interp
        .load_prelude("namespace Js; class ByRef { public $value; } class Wait {}")
        .map_err(describe)?;
    let value = interp
        .eval_source(
            "call_user_func(function () {\n\
                 class Inner { public $n = 7; }\n\
                 function helper() { return 3; }\n\
                 $o = new Inner;\n\
                 return class_exists('Inner') ? $o->n * helper() : -1;\n\
             })",
        )
        .map_err(describe)?;
    assert_eq!(value, Value::Int(21));
    Ok(())
}
