//! Python programs that host the caller's code.
//!
//! Both read `[code, globals]` as JSON on stdin, run `code` with `globals`,
//! apply the same JSON-safe projection the host applies, and write the
//! result as one JSON object to the real stdout. Whatever the code prints
//! goes to a sink so it cannot corrupt that object.

const PRELUDE: &str = r#"import json
import sys


class DevNull(object):
    def write(self, *args, **kwargs):
        pass

    def flush(self, *args, **kwargs):
        pass


real_stdout = sys.stdout
sys.stdout = DevNull()

code, g_dict = json.load(sys.stdin)
"#;

const PROJECTION: &str = r#"

def jsonable(v):
    try:
        json.loads(json.dumps(v, ensure_ascii=False, allow_nan=False).encode("utf-8"))
    except Exception:
        return False
    return True


# Widest integers the host side can read back.
int_min = -(2 ** 63)
int_max = 2 ** 64 - 1


def ints_fit(v):
    if isinstance(v, bool):
        return True
    if isinstance(v, int):
        return int_min <= v <= int_max
    if isinstance(v, (list, tuple)):
        return all(ints_fit(x) for x in v)
    if isinstance(v, dict):
        return all(ints_fit(x) for x in v.values())
    return True


ok_types = (type(None), bool, int, float, str, list, tuple, dict)
bad_keys = ("__builtins__",)


def filter_globals(g):
    out = {}
    for k, v in g.items():
        if not isinstance(k, str) or k in bad_keys:
            continue
        if not isinstance(v, ok_types):
            continue
        if not jsonable(v) or not ints_fit(v):
            continue
        out[k] = v
    return out


json.dump(filter_globals(g_dict), real_stdout, allow_nan=False)
real_stdout.flush()
"#;

const JAILED_EXEC: &str = "exec(code, g_dict)\n";

const UNSAFE_EXEC: &str = r#"try:
    exec(code, g_dict)
except Exception as e:
    sys.stderr.write("%s: %s" % (type(e).__name__, e))
    sys.stderr.flush()
    sys.exit(1)
"#;

fn sys_path_lines(entries: &[String]) -> String {
    entries
        .iter()
        .map(|entry| {
            // A JSON string literal is also a valid Python string literal.
            let literal = serde_json::to_string(entry).unwrap_or_else(|_| "\"\"".to_string());
            format!("sys.path.append({})\n", literal)
        })
        .collect()
}

/// Wrapper run inside the jail. `path_entries` are the basenames of the
/// python_path directories, which are copied into the sandbox root.
pub fn jailed_wrapper(path_entries: &[String]) -> String {
    [PRELUDE, &sys_path_lines(path_entries), JAILED_EXEC, PROJECTION].concat()
}

/// Wrapper for the unjailed fallback: `path_entries` are full host paths and
/// exceptions are reported as `"<ExceptionClassName>: <message>"`.
pub fn unsafe_wrapper(path_entries: &[String]) -> String {
    [PRELUDE, &sys_path_lines(path_entries), UNSAFE_EXEC, PROJECTION].concat()
}
