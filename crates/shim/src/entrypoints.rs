//! Built-in entrypoint sources for the ansible command line tools

use std::collections::BTreeMap;

/// Tool name and the `ansible.cli` module implementing it
const TOOLS: &[(&str, &str)] = &[
    ("ansible", "adhoc"),
    ("ansible-config", "config"),
    ("ansible-doc", "doc"),
    ("ansible-galaxy", "galaxy"),
    ("ansible-playbook", "playbook"),
];

fn entrypoint(module: &str) -> String {
    format!(
        r#"# -*- coding: utf-8 -*-
import re
import sys

from ansible.cli.{module} import main

if __name__ == "__main__":
    sys.argv[0] = re.sub(r"(-script\.pyw|\.exe)?$", "", sys.argv[0])
    sys.exit(main())
"#
    )
}

/// Name of the wrapped ansible-lint entrypoint inside a shim sandbox
pub const ANSIBLE_LINT: &str = "ansible-lint";

/// ansible-lint with symlinked inputs kept at their sandbox paths
///
/// Stock ansible-lint resolves every input to its real location. Inside a
/// build sandbox that is the source tree, which lies outside `--project-dir`
/// and would show up verbatim in reported findings.
const ANSIBLE_LINT_SOURCE: &str = r#"# -*- coding: utf-8 -*-
import sys
from pathlib import Path

import ansiblelint.file_utils
from ansiblelint.file_utils import Lintable


class SandboxLintable(Lintable):
    def __init__(self, name, *args, **kwargs):
        sandbox_path = Path.cwd() / name
        super().__init__(name, *args, **kwargs)

        self.path = self.abspath = sandbox_path
        self.name = self.filename = str(sandbox_path)


ansiblelint.file_utils.Lintable = SandboxLintable

from ansiblelint.__main__ import _run_cli_entrypoint  # noqa: E402

if __name__ == "__main__":
    sys.exit(_run_cli_entrypoint())
"#;

/// Source of the wrapped ansible-lint entrypoint
pub fn ansible_lint_entrypoint() -> String {
    ANSIBLE_LINT_SOURCE.to_string()
}

/// Shim sources for every ansible tool ansible-lint may invoke
pub fn ansible_entrypoints() -> BTreeMap<String, String> {
    TOOLS
        .iter()
        .map(|(tool, module)| (tool.to_string(), entrypoint(module)))
        .collect()
}
