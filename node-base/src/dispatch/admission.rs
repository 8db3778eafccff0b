/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node-state admission control for inbound commands.
//!
//! Rules, first match wins:
//!
//! | # | Condition | Result |
//! |---|---|---|
//! | 1 | command class `System` | admitted |
//! | 2 | emergency stop asserted | rejected |
//! | 3 | command class `Assembly` | admitted only in `Assembly` state |
//! | 4 | any other class | admitted only in `Normal` state |

use crate::can::{CanId, MessageClass};
use crate::node::NodeState;

/// `true` if a command with identifier `id` may run now.
pub fn command_acceptable(id: CanId, state: NodeState, emergency_stop: bool) -> bool {
    match id.class() {
        MessageClass::System => true,
        _ if emergency_stop => false,
        MessageClass::Assembly => state == NodeState::Assembly,
        _ => state == NodeState::Normal,
    }
}
