use std::collections::HashMap;
use std::sync::OnceLock;

/// Every operation the VM knows how to execute. Names not in this set compile
/// to `Unsupported` and are reported at dispatch time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // motion
    MoveSteps,
    TurnRight,
    TurnLeft,
    GoToXY,
    PointInDirection,
    ChangeXBy,
    SetX,
    ChangeYBy,
    SetY,
    IfOnEdgeBounce,
    XPosition,
    YPosition,
    Direction,
    // looks
    SwitchCostumeTo,
    CostumeMenu,
    NextCostume,
    SwitchBackdropTo,
    BackdropsMenu,
    Say,
    SayForSecs,
    Show,
    Hide,
    SetSizeTo,
    ChangeSizeBy,
    Size,
    // sound
    PlaySound,
    PlaySoundUntilDone,
    SoundsMenu,
    StopAllSounds,
    // events
    Broadcast,
    BroadcastAndWait,
    // control
    Wait,
    Forever,
    Repeat,
    If,
    IfElse,
    WaitUntil,
    RepeatUntil,
    Stop,
    // sensing
    TouchingObject,
    TouchingObjectMenu,
    MouseX,
    MouseY,
    Timer,
    ResetTimer,
    // operators
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Gt,
    Lt,
    Equals,
    And,
    Or,
    Not,
    Random,
    Join,
    LetterOf,
    Length,
    Contains,
    Round,
    MathOp,
    // data
    SetVariableTo,
    ChangeVariableBy,

    Unsupported,
}

impl Opcode {
    pub const ALL: &'static [Opcode] = &[
        Self::MoveSteps,
        Self::TurnRight,
        Self::TurnLeft,
        Self::GoToXY,
        Self::PointInDirection,
        Self::ChangeXBy,
        Self::SetX,
        Self::ChangeYBy,
        Self::SetY,
        Self::IfOnEdgeBounce,
        Self::XPosition,
        Self::YPosition,
        Self::Direction,
        Self::SwitchCostumeTo,
        Self::CostumeMenu,
        Self::NextCostume,
        Self::SwitchBackdropTo,
        Self::BackdropsMenu,
        Self::Say,
        Self::SayForSecs,
        Self::Show,
        Self::Hide,
        Self::SetSizeTo,
        Self::ChangeSizeBy,
        Self::Size,
        Self::PlaySound,
        Self::PlaySoundUntilDone,
        Self::SoundsMenu,
        Self::StopAllSounds,
        Self::Broadcast,
        Self::BroadcastAndWait,
        Self::Wait,
        Self::Forever,
        Self::Repeat,
        Self::If,
        Self::IfElse,
        Self::WaitUntil,
        Self::RepeatUntil,
        Self::Stop,
        Self::TouchingObject,
        Self::TouchingObjectMenu,
        Self::MouseX,
        Self::MouseY,
        Self::Timer,
        Self::ResetTimer,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Mod,
        Self::Gt,
        Self::Lt,
        Self::Equals,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Random,
        Self::Join,
        Self::LetterOf,
        Self::Length,
        Self::Contains,
        Self::Round,
        Self::MathOp,
        Self::SetVariableTo,
        Self::ChangeVariableBy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MoveSteps => "motion_movesteps",
            Self::TurnRight => "motion_turnright",
            Self::TurnLeft => "motion_turnleft",
            Self::GoToXY => "motion_gotoxy",
            Self::PointInDirection => "motion_pointindirection",
            Self::ChangeXBy => "motion_changexby",
            Self::SetX => "motion_setx",
            Self::ChangeYBy => "motion_changeyby",
            Self::SetY => "motion_sety",
            Self::IfOnEdgeBounce => "motion_ifonedgebounce",
            Self::XPosition => "motion_xposition",
            Self::YPosition => "motion_yposition",
            Self::Direction => "motion_direction",
            Self::SwitchCostumeTo => "looks_switchcostumeto",
            Self::CostumeMenu => "looks_costume",
            Self::NextCostume => "looks_nextcostume",
            Self::SwitchBackdropTo => "looks_switchbackdropto",
            Self::BackdropsMenu => "looks_backdrops",
            Self::Say => "looks_say",
            Self::SayForSecs => "looks_sayforsecs",
            Self::Show => "looks_show",
            Self::Hide => "looks_hide",
            Self::SetSizeTo => "looks_setsizeto",
            Self::ChangeSizeBy => "looks_changesizeby",
            Self::Size => "looks_size",
            Self::PlaySound => "sound_play",
            Self::PlaySoundUntilDone => "sound_playuntildone",
            Self::SoundsMenu => "sound_sounds_menu",
            Self::StopAllSounds => "sound_stopallsounds",
            Self::Broadcast => "event_broadcast",
            Self::BroadcastAndWait => "event_broadcastandwait",
            Self::Wait => "control_wait",
            Self::Forever => "control_forever",
            Self::Repeat => "control_repeat",
            Self::If => "control_if",
            Self::IfElse => "control_if_else",
            Self::WaitUntil => "control_wait_until",
            Self::RepeatUntil => "control_repeat_until",
            Self::Stop => "control_stop",
            Self::TouchingObject => "sensing_touchingobject",
            Self::TouchingObjectMenu => "sensing_touchingobjectmenu",
            Self::MouseX => "sensing_mousex",
            Self::MouseY => "sensing_mousey",
            Self::Timer => "sensing_timer",
            Self::ResetTimer => "sensing_resettimer",
            Self::Add => "operator_add",
            Self::Subtract => "operator_subtract",
            Self::Multiply => "operator_multiply",
            Self::Divide => "operator_divide",
            Self::Mod => "operator_mod",
            Self::Gt => "operator_gt",
            Self::Lt => "operator_lt",
            Self::Equals => "operator_equals",
            Self::And => "operator_and",
            Self::Or => "operator_or",
            Self::Not => "operator_not",
            Self::Random => "operator_random",
            Self::Join => "operator_join",
            Self::LetterOf => "operator_letter_of",
            Self::Length => "operator_length",
            Self::Contains => "operator_contains",
            Self::Round => "operator_round",
            Self::MathOp => "operator_mathop",
            Self::SetVariableTo => "data_setvariableto",
            Self::ChangeVariableBy => "data_changevariableby",
            Self::Unsupported => "unsupported",
        }
    }

    /// Resolves an opcode name through the static table; unknown names map to `Unsupported`.
    pub fn from_name(name: &str) -> Self {
        opcode_table()
            .get(name)
            .copied()
            .unwrap_or(Self::Unsupported)
    }
}

fn opcode_table() -> &'static HashMap<&'static str, Opcode> {
    static TABLE: OnceLock<HashMap<&'static str, Opcode>> = OnceLock::new();
    TABLE.get_or_init(|| Opcode::ALL.iter().map(|op| (op.name(), *op)).collect())
}
